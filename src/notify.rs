// Notification dispatch: turns a new listing into a user-facing alert.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;

use crate::models::listing::Listing;

const FIELD_MAX_CHARS: usize = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where alerts end up (desktop notifier, webhook, log...).
#[async_trait]
pub trait NotificationSurface: Send + Sync {
    async fn notify(&self, title: &str, body: &str, url: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered,
    Failed(String),
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchResult::Delivered)
    }
}

/// Formats listings and hands them to a surface with a bounded wait.
/// Never panics or propagates surface errors.
#[derive(Clone)]
pub struct NotificationDispatcher {
    surface: Arc<dyn NotificationSurface>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        Self {
            surface,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn dispatch(&self, listing: &Listing) -> DispatchResult {
        let title = notification_title(listing);
        let body = notification_body(listing);

        let outcome = tokio::time::timeout(
            self.timeout,
            self.surface.notify(&title, &body, &listing.url),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                log_delivered(listing);
                DispatchResult::Delivered
            }
            Ok(Err(e)) => DispatchResult::Failed(format!("{e:#}")),
            Err(_) => DispatchResult::Failed(format!(
                "notification timed out after {}s",
                self.timeout.as_secs_f32()
            )),
        }
    }
}

pub fn notification_title(listing: &Listing) -> String {
    format!(
        "New Job ({}): {}",
        listing.source_id.display_name(),
        truncate(&listing.company, FIELD_MAX_CHARS)
    )
}

pub fn notification_body(listing: &Listing) -> String {
    let mut body = format!(
        "{} in {}",
        truncate(&listing.title, FIELD_MAX_CHARS),
        truncate(&listing.location, FIELD_MAX_CHARS)
    );
    if let Some(salary) = listing.raw("salary_range") {
        body.push_str(&format!("\nSalary: {salary}"));
    }
    body
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Detailed record of a delivered listing.
fn log_delivered(listing: &Listing) {
    let requirements = listing.raw("requirements").map(|r| {
        let top: Vec<&str> = r.split("; ").take(3).collect();
        format!("{}...", top.join(", "))
    });
    tracing::info!(
        target: "jobmonitor::listings",
        source = %listing.source_id,
        external_id = %listing.external_id,
        company = %listing.company,
        role = %listing.title,
        location = %listing.location,
        link = %listing.url,
        date = %listing.posted_at.map(|d| d.to_rfc3339()).unwrap_or_default(),
        salary = %listing.raw("salary_range").unwrap_or_default(),
        requirements = %requirements.unwrap_or_default(),
        "New {} listing: {} at {}",
        listing.source_id,
        listing.title,
        listing.company
    );
}

/// Surface that only writes the alert to the log.
#[derive(Debug, Default, Clone)]
pub struct LogSurface;

#[async_trait]
impl NotificationSurface for LogSurface {
    async fn notify(&self, title: &str, body: &str, url: &str) -> anyhow::Result<()> {
        tracing::info!(target: "jobmonitor::notify", %url, "{title}: {body}");
        Ok(())
    }
}

/// Surface that runs an external program such as `notify-send` with
/// `<title> <body>\n<url>` as arguments.
#[derive(Debug, Clone)]
pub struct CommandSurface {
    program: String,
    args: Vec<String>,
}

impl CommandSurface {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before title and body (e.g. `--app-name=jobmonitor`).
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl NotificationSurface for CommandSurface {
    async fn notify(&self, title: &str, body: &str, url: &str) -> anyhow::Result<()> {
        let message = if url.is_empty() {
            body.to_string()
        } else {
            format!("{body}\n{url}")
        };
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(title)
            .arg(message)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }
}
