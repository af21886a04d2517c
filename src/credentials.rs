use std::collections::HashMap;
use std::fmt;

use crate::models::listing::SourceId;

/// Opaque secret handed to an adapter: an API key, token, or session cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no credential available for source '{0}'")]
pub struct CredentialMissing(pub SourceId);

/// Where credentials come from. Resolved once at startup, never inside a poll loop.
pub trait SecretStore: Send + Sync {
    fn get_credential(&self, source: SourceId) -> Result<Credential, CredentialMissing>;
}

/// Reads `JOBMONITOR_<SOURCE>_CREDENTIAL` from the environment, e.g.
/// `JOBMONITOR_JOBRIGHT_CREDENTIAL`.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    pub fn var_name(&self, source: SourceId) -> String {
        let prefix = self.prefix.as_deref().unwrap_or("JOBMONITOR");
        format!("{prefix}_{}_CREDENTIAL", source.as_str().to_ascii_uppercase())
    }
}

impl SecretStore for EnvSecretStore {
    fn get_credential(&self, source: SourceId) -> Result<Credential, CredentialMissing> {
        std::env::var(self.var_name(source))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Credential::new)
            .ok_or(CredentialMissing(source))
    }
}

/// Fixed set of credentials, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<SourceId, Credential>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: SourceId, secret: impl Into<String>) -> Self {
        self.secrets.insert(source, Credential::new(secret));
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get_credential(&self, source: SourceId) -> Result<Credential, CredentialMissing> {
        self.secrets
            .get(&source)
            .cloned()
            .ok_or(CredentialMissing(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secret() {
        let c = Credential::new("hunter2");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert_eq!(c.expose(), "hunter2");
    }

    #[test]
    fn env_var_names_follow_source() {
        let store = EnvSecretStore::with_prefix("JM_TEST");
        assert_eq!(store.var_name(SourceId::Jobright), "JM_TEST_JOBRIGHT_CREDENTIAL");
        assert_eq!(
            EnvSecretStore::new().var_name(SourceId::Github),
            "JOBMONITOR_GITHUB_CREDENTIAL"
        );
    }

    #[test]
    fn static_store_reports_missing_sources() {
        let store = StaticSecretStore::new().with(SourceId::Jobright, "key");
        assert_eq!(store.get_credential(SourceId::Jobright).unwrap().expose(), "key");
        assert_eq!(
            store.get_credential(SourceId::Linkedin),
            Err(CredentialMissing(SourceId::Linkedin))
        );
    }
}
