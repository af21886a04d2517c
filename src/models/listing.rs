use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which adapter produced a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Github,
    Linkedin,
    Jobright,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Github, SourceId::Linkedin, SourceId::Jobright];

    /// Stable key used in the dedup store and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Github => "github",
            SourceId::Linkedin => "linkedin",
            SourceId::Jobright => "jobright",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::Github => "GitHub",
            SourceId::Linkedin => "LinkedIn",
            SourceId::Jobright => "JobRight",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(SourceId::Github),
            "linkedin" => Ok(SourceId::Linkedin),
            "jobright" => Ok(SourceId::Jobright),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// A job posting normalized from any source.
///
/// Identity is `(source_id, external_id)`; every other field may drift between
/// polls without the listing being considered new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub source_id: SourceId,
    pub external_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_fields: BTreeMap<String, String>,
}

impl Listing {
    pub fn new(source_id: SourceId, external_id: impl Into<String>) -> Self {
        Self {
            source_id,
            external_id: external_id.into(),
            title: String::new(),
            company: String::new(),
            location: String::new(),
            url: String::new(),
            posted_at: None,
            raw_fields: BTreeMap::new(),
        }
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.raw_fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
