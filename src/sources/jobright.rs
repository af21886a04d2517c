use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::{JobrightConfig, JobrightSearch};
use crate::credentials::Credential;
use crate::error::SourceError;
use crate::models::listing::{Listing, SourceId};
use crate::sources::{SourceAdapter, http_client, read_body};

const BASE_URL: &str = "https://api.jobright.ai/v1";
const PAGE_SIZE: u32 = 100;

/// Queries the aggregator's job search API with a bearer API key.
pub struct AggregatorApiAdapter {
    config: JobrightConfig,
    api_key: Credential,
    client: reqwest::Client,
    base_url: String,
    /// Cleared after an auth failure so the next fetch re-verifies the key.
    verified: AtomicBool,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a JobrightSearch,
    page: u32,
    per_page: u32,
}

#[async_trait]
impl SourceAdapter for AggregatorApiAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::Jobright
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        if !self.verified.load(Ordering::Acquire) {
            self.verify().await?;
        }

        match self.search().await {
            Err(e @ SourceError::Auth { .. }) => {
                self.verified.store(false, Ordering::Release);
                Err(e)
            }
            other => other,
        }
    }
}

impl AggregatorApiAdapter {
    pub fn new(config: JobrightConfig, api_key: Credential) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            config,
            api_key,
            client: http_client(),
            base_url,
            verified: AtomicBool::new(false),
        }
    }

    /// Check the API key before searching.
    async fn verify(&self) -> Result<(), SourceError> {
        let resp = self
            .client
            .get(format!("{}/auth/verify", self.base_url))
            .bearer_auth(self.api_key.expose())
            .send()
            .await?;
        read_body(resp).await?;
        tracing::debug!("JobRight API key verified");
        self.verified.store(true, Ordering::Release);
        Ok(())
    }

    async fn search(&self) -> Result<Vec<Listing>, SourceError> {
        let request = SearchRequest {
            query: &self.config.search_params,
            page: 1,
            per_page: PAGE_SIZE,
        };
        let resp = self
            .client
            .post(format!("{}/jobs/search", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;
        let body = read_body(resp).await?;
        parse_search_response(&body)
    }
}

/// Parse a `/jobs/search` response body.
pub fn parse_search_response(body: &str) -> Result<Vec<Listing>, SourceError> {
    let data: Value = serde_json::from_str(body)
        .map_err(|e| SourceError::parse(format!("search response: {e}"), body))?;

    let jobs = match data.get("jobs") {
        Some(Value::Array(jobs)) => jobs,
        Some(Value::Null) | None if data.is_object() => return Ok(Vec::new()),
        _ => return Err(SourceError::parse("missing 'jobs' array", body)),
    };

    let mut listings = Vec::with_capacity(jobs.len());
    for job in jobs {
        match parse_job(job) {
            Some(listing) => listings.push(listing),
            None => tracing::debug!("Skipping JobRight job without id or application_url"),
        }
    }
    Ok(listings)
}

fn str_field(job: &Value, key: &str) -> String {
    job.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_job(job: &Value) -> Option<Listing> {
    let url = str_field(job, "application_url");
    let external_id = match job.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ if !url.is_empty() => url.clone(),
        _ => return None,
    };

    let mut listing = Listing::new(SourceId::Jobright, external_id);
    listing.title = str_field(job, "title");
    listing.company = str_field(job, "company_name");
    listing.location = str_field(job, "location");
    listing.url = url;
    listing.posted_at = parse_timestamp(&str_field(job, "posted_at"));

    for key in ["salary_range", "employment_type", "description", "posted_at"] {
        let value = str_field(job, key);
        if !value.is_empty() {
            listing.raw_fields.insert(key.to_string(), value);
        }
    }
    if let Some(requirements) = job.get("requirements").and_then(|v| v.as_array()) {
        let joined = requirements
            .iter()
            .filter_map(|r| r.as_str())
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        if !joined.is_empty() {
            listing.raw_fields.insert("requirements".to_string(), joined);
        }
    }
    Some(listing)
}

/// RFC 3339 timestamps, falling back to a bare `YYYY-MM-DD` date.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
