use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::models::listing::SourceId;
use crate::runner::BackoffPolicy;

#[derive(Parser, Debug, Clone)]
#[command(name = "jobmonitor", about = "Watch job listing sources and notify on new postings")]
pub struct Config {
    /// Path to the JSON configuration file (created with defaults if missing)
    #[arg(long, env = "JOBMONITOR_CONFIG", default_value = "job_monitor_config.json")]
    pub config: PathBuf,

    /// SQLite file holding already-notified listing keys
    #[arg(long, env = "JOBMONITOR_STATE_DB", default_value = "jobmonitor.db")]
    pub state_db: PathBuf,

    /// Serve /healthz, /status and /seen on this address
    #[arg(long, env = "JOBMONITOR_STATUS_ADDR")]
    pub status_addr: Option<String>,

    /// Program invoked as `<program> <title> <body>` for each new listing
    #[arg(long, env = "JOBMONITOR_NOTIFY_COMMAND")]
    pub notify_command: Option<String>,

    /// Seconds to wait for in-flight cycles on shutdown
    #[arg(long, env = "JOBMONITOR_GRACE_PERIOD", default_value = "10")]
    pub grace_period: u64,

    /// Log output format
    #[arg(long, env = "JOBMONITOR_LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll all enabled sources until interrupted (default)
    Run,
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Record every currently open listing as seen without notifying
    Seed,
}

impl Config {
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }
}

/// Immutable settings for one monitor run.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub fetch_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub degraded_after: u32,
    /// Silently record the first fetch of a source the store knows nothing about.
    pub baseline_empty_sources: bool,
    pub sources: Vec<SourceConfig>,
}

/// Connection and query parameters for one source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    Github(GithubConfig),
    Linkedin(LinkedinConfig),
    Jobright(JobrightConfig),
}

impl SourceConfig {
    pub fn id(&self) -> SourceId {
        match self {
            SourceConfig::Github(_) => SourceId::Github,
            SourceConfig::Linkedin(_) => SourceId::Linkedin,
            SourceConfig::Jobright(_) => SourceId::Jobright,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_listings_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedinConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Query parameters passed verbatim to the search page (`keywords`, `location`, `f_E`, ...).
    #[serde(default)]
    pub search_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobrightConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub search_params: JobrightSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobrightSearch {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub experience_levels: Vec<String>,
    #[serde(default)]
    pub job_types: Vec<String>,
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default = "default_posted_within_days")]
    pub posted_within_days: u32,
}

impl Default for JobrightSearch {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            locations: Vec::new(),
            experience_levels: Vec::new(),
            job_types: Vec::new(),
            remote: None,
            posted_within_days: default_posted_within_days(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffFile {
    /// Seconds to wait after the first failure
    pub base: u64,
    /// Upper bound in seconds
    pub max: u64,
}

impl Default for BackoffFile {
    fn default() -> Self {
        Self { base: 30, max: 1800 }
    }
}

/// On-disk configuration, all durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: u64,
    #[serde(default)]
    pub backoff: BackoffFile,
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    #[serde(default = "enabled")]
    pub baseline_empty_sources: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<LinkedinConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobright: Option<JobrightConfig>,
}

fn enabled() -> bool {
    true
}

fn default_branch() -> String {
    "dev".to_string()
}

fn default_listings_path() -> String {
    "README.md".to_string()
}

fn default_posted_within_days() -> u32 {
    30
}

fn default_check_interval() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_dispatch_timeout() -> u64 {
    10
}

fn default_degraded_after() -> u32 {
    5
}

impl Default for ConfigFile {
    fn default() -> Self {
        let linkedin_params = [
            ("keywords", "software engineer new grad"),
            ("location", "United States"),
            ("f_E", "2"),
            ("sortBy", "DD"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            check_interval: default_check_interval(),
            fetch_timeout: default_fetch_timeout(),
            dispatch_timeout: default_dispatch_timeout(),
            backoff: BackoffFile::default(),
            degraded_after: default_degraded_after(),
            baseline_empty_sources: true,
            github: Some(GithubConfig {
                enabled: true,
                owner: "SimplifyJobs".to_string(),
                repo: "New-Grad-Positions".to_string(),
                branch: default_branch(),
                path: default_listings_path(),
            }),
            linkedin: Some(LinkedinConfig {
                enabled: true,
                search_params: linkedin_params,
            }),
            jobright: Some(JobrightConfig {
                enabled: true,
                base_url: None,
                search_params: JobrightSearch {
                    keywords: vec!["software engineer".to_string(), "developer".to_string()],
                    locations: vec!["United States".to_string()],
                    experience_levels: vec!["entry".to_string()],
                    job_types: vec!["full-time".to_string()],
                    remote: Some(true),
                    posted_within_days: 30,
                },
            }),
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load `path`, writing the defaults there first if it does not exist.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, writing defaults", path.display());
            Self::default().write(path)?;
        }
        Self::load(path)
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn into_monitor_config(self) -> anyhow::Result<MonitorConfig> {
        if self.check_interval == 0 {
            bail!("check_interval must be greater than zero");
        }
        if self.fetch_timeout == 0 {
            bail!("fetch_timeout must be greater than zero");
        }
        if self.dispatch_timeout == 0 {
            bail!("dispatch_timeout must be greater than zero");
        }
        if self.backoff.base == 0 {
            bail!("backoff.base must be greater than zero");
        }
        if self.backoff.max < self.backoff.base {
            bail!(
                "backoff.max ({}) must not be below backoff.base ({})",
                self.backoff.max,
                self.backoff.base
            );
        }
        if self.degraded_after == 0 {
            bail!("degraded_after must be at least 1");
        }

        let mut sources = Vec::new();
        if let Some(github) = self.github.filter(|c| c.enabled) {
            sources.push(SourceConfig::Github(github));
        }
        if let Some(linkedin) = self.linkedin.filter(|c| c.enabled) {
            sources.push(SourceConfig::Linkedin(linkedin));
        }
        if let Some(jobright) = self.jobright.filter(|c| c.enabled) {
            sources.push(SourceConfig::Jobright(jobright));
        }

        Ok(MonitorConfig {
            check_interval: Duration::from_secs(self.check_interval),
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout),
            backoff: BackoffPolicy::new(
                Duration::from_secs(self.backoff.base),
                Duration::from_secs(self.backoff.max),
            ),
            degraded_after: self.degraded_after,
            baseline_empty_sources: self.baseline_empty_sources,
            sources,
        })
    }
}
