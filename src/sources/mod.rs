// Source adapters: one per external job source, all producing `Listing`s.

pub mod github;
pub mod jobright;
pub mod linkedin;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::credentials::{CredentialMissing, SecretStore};
use crate::error::SourceError;
use crate::models::listing::{Listing, SourceId};

pub const USER_AGENT: &str = concat!("jobmonitor/", env!("CARGO_PKG_VERSION"));

/// Trait that every job source implements.
///
/// `fetch_listings` only reads from the source. It never marks listings seen or
/// notifies; the runner owns both. Transport state (clients, sessions) lives
/// inside the adapter, which re-establishes it after recoverable failures.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Everything currently listed by the source. An empty vector is a normal result.
    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError>;
}

/// Build the adapter for `config`, resolving its credential once.
///
/// Only sources that cannot run anonymously fail with `CredentialMissing`.
pub fn build_adapter(
    config: &SourceConfig,
    secrets: &dyn SecretStore,
) -> Result<Box<dyn SourceAdapter>, CredentialMissing> {
    let adapter: Box<dyn SourceAdapter> = match config {
        SourceConfig::Github(cfg) => Box::new(github::RepoListingsAdapter::new(
            cfg.clone(),
            secrets.get_credential(SourceId::Github).ok(),
        )),
        SourceConfig::Linkedin(cfg) => Box::new(linkedin::SearchPageAdapter::new(
            cfg.clone(),
            secrets.get_credential(SourceId::Linkedin).ok(),
        )),
        SourceConfig::Jobright(cfg) => Box::new(jobright::AggregatorApiAdapter::new(
            cfg.clone(),
            secrets.get_credential(SourceId::Jobright)?,
        )),
    };
    Ok(adapter)
}

/// Shared HTTP client settings. Per-call deadlines are enforced by the runner.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

/// Read a response body, turning non-success statuses into `SourceError`s.
pub(crate) async fn read_body(resp: reqwest::Response) -> Result<String, SourceError> {
    let status = resp.status();
    let exhausted = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(SourceError::from_status(status.as_u16(), &body, exhausted));
    }
    Ok(body)
}

/// Collapse whitespace and trim.
pub(crate) fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, JobrightConfig, JobrightSearch};
    use crate::credentials::StaticSecretStore;

    #[test]
    fn aggregator_requires_a_credential() {
        let cfg = SourceConfig::Jobright(JobrightConfig {
            enabled: true,
            base_url: None,
            search_params: JobrightSearch::default(),
        });
        let err = build_adapter(&cfg, &StaticSecretStore::new()).err();
        assert_eq!(err, Some(CredentialMissing(SourceId::Jobright)));

        let secrets = StaticSecretStore::new().with(SourceId::Jobright, "k");
        let adapter = build_adapter(&cfg, &secrets).unwrap();
        assert_eq!(adapter.source_id(), SourceId::Jobright);
    }

    #[test]
    fn anonymous_sources_build_without_credentials() {
        let cfg = ConfigFile::default().into_monitor_config().unwrap();
        let empty = StaticSecretStore::new();
        for source in cfg.sources.iter().filter(|s| s.id() != SourceId::Jobright) {
            let adapter = build_adapter(source, &empty).unwrap();
            assert_eq!(adapter.source_id(), source.id());
        }
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  Software\n   Engineer \t I "), "Software Engineer I");
    }
}
