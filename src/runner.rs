use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::dedup::DedupStore;
use crate::error::{SourceError, StoreError};
use crate::events::MonitorEvent;
use crate::models::listing::{Listing, SourceId};
use crate::notify::{DispatchResult, NotificationDispatcher};
use crate::sources::SourceAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Fetching,
    Processing,
    Sleeping,
    Backoff,
    Stopped,
}

/// Doubling retry delay between `base` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Failure streak of one source.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Count a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.policy.delay_for(self.failures)
    }

    /// Clear the streak, returning its length.
    pub fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.failures)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub check_interval: Duration,
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub degraded_after: u32,
    /// Record the first fetch silently when the store has no keys for the source.
    pub baseline_empty: bool,
}

impl From<&MonitorConfig> for RunnerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            check_interval: config.check_interval,
            fetch_timeout: config.fetch_timeout,
            backoff: config.backoff,
            degraded_after: config.degraded_after,
            baseline_empty: config.baseline_empty_sources,
        }
    }
}

/// Why a polling cycle did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub new: usize,
    pub notified: usize,
}

/// Polls one adapter until cancelled.
///
/// Cycles are strictly sequential. Cancellation is checked before each fetch
/// and raced against every wait; a fetch already in flight is left to finish
/// (bounded by `fetch_timeout`) along with the processing that follows it.
pub struct SourceRunner {
    source: SourceId,
    adapter: Box<dyn SourceAdapter>,
    store: Arc<dyn DedupStore>,
    dispatcher: NotificationDispatcher,
    settings: RunnerSettings,
    events: UnboundedSender<MonitorEvent>,
    cancel: CancellationToken,
    backoff: Backoff,
    degraded: bool,
    baseline_pending: bool,
    state: RunnerState,
}

impl SourceRunner {
    pub fn new(
        adapter: Box<dyn SourceAdapter>,
        store: Arc<dyn DedupStore>,
        dispatcher: NotificationDispatcher,
        settings: RunnerSettings,
        events: UnboundedSender<MonitorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: adapter.source_id(),
            adapter,
            store,
            dispatcher,
            backoff: Backoff::new(settings.backoff),
            settings,
            events,
            cancel,
            degraded: false,
            baseline_pending: settings.baseline_empty,
            state: RunnerState::Idle,
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source
    }

    pub async fn run(mut self) -> RunnerState {
        self.set_state(RunnerState::Idle);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let wait = match self.run_cycle().await {
                Ok(summary) => {
                    self.on_success(summary);
                    self.set_state(RunnerState::Sleeping);
                    self.settings.check_interval
                }
                Err(e) => {
                    let delay = self.on_failure(&e);
                    self.set_state(RunnerState::Backoff);
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.set_state(RunnerState::Stopped);
        self.state
    }

    /// One fetch-filter-notify pass. Listings are marked seen only after
    /// they were delivered.
    ///
    /// With `baseline_empty` set, the first successful fetch of a source the
    /// store has never recorded is marked without notifying.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary, CycleError> {
        let listings = self.fetch().await?;

        self.set_state(RunnerState::Processing);
        let fetched = listings.len();
        if self.baseline_pending {
            let known = self.store.has_any(self.source).await?;
            self.baseline_pending = false;
            if !known {
                let recorded = self.mark_all(listings).await?;
                self.emit(MonitorEvent::BaselineRecorded {
                    source: self.source,
                    recorded,
                });
                return Ok(CycleSummary {
                    fetched,
                    ..CycleSummary::default()
                });
            }
        }
        let fresh = self.store.filter_new(listings).await?;

        let mut notified = 0;
        for listing in &fresh {
            self.emit(MonitorEvent::ListingFound {
                source: self.source,
                external_id: listing.external_id.clone(),
                title: listing.title.clone(),
                company: listing.company.clone(),
                url: listing.url.clone(),
            });

            match self.dispatcher.dispatch(listing).await {
                DispatchResult::Delivered => {
                    notified += 1;
                    if let Err(e) = self
                        .store
                        .mark_seen(self.source, &listing.external_id, Utc::now())
                        .await
                    {
                        self.emit(MonitorEvent::MarkSeenFailed {
                            source: self.source,
                            external_id: listing.external_id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                DispatchResult::Failed(reason) => self.emit(MonitorEvent::DispatchFailed {
                    source: self.source,
                    external_id: listing.external_id.clone(),
                    reason,
                }),
            }
        }

        Ok(CycleSummary {
            fetched,
            new: fresh.len(),
            notified,
        })
    }

    /// Fetch once and mark everything returned as seen without notifying.
    pub async fn seed(&mut self) -> Result<usize, CycleError> {
        let listings = self.fetch().await?;
        self.set_state(RunnerState::Processing);
        let recorded = self.mark_all(listings).await?;
        self.set_state(RunnerState::Stopped);
        Ok(recorded)
    }

    /// Mark every unseen listing, returning how many were new.
    async fn mark_all(&self, listings: Vec<Listing>) -> Result<usize, StoreError> {
        let fresh = self.store.filter_new(listings).await?;
        let now = Utc::now();
        for listing in &fresh {
            self.store
                .mark_seen(self.source, &listing.external_id, now)
                .await?;
        }
        Ok(fresh.len())
    }

    async fn fetch(&mut self) -> Result<Vec<Listing>, SourceError> {
        self.set_state(RunnerState::Fetching);
        let timeout = self.settings.fetch_timeout;
        // A panicking adapter counts as a failed fetch so the runner keeps polling.
        let fetch = AssertUnwindSafe(self.adapter.fetch_listings()).catch_unwind();
        match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SourceError::parse(
                format!("adapter panicked: {}", panic_message(&panic)),
                "",
            )),
            Err(_) => Err(SourceError::TransientNetwork(format!(
                "fetch timed out after {}s",
                timeout.as_secs_f32()
            ))),
        }
    }

    fn on_success(&mut self, summary: CycleSummary) {
        let after_failures = self.backoff.reset();
        self.emit(MonitorEvent::CycleCompleted {
            source: self.source,
            fetched: summary.fetched,
            new: summary.new,
            notified: summary.notified,
        });
        if self.degraded {
            self.degraded = false;
            self.emit(MonitorEvent::SourceRecovered {
                source: self.source,
                after_failures,
            });
        }
    }

    fn on_failure(&mut self, error: &CycleError) -> Duration {
        let delay = self.backoff.next_delay();
        let failures = self.backoff.consecutive_failures();
        let (kind, status) = match error {
            CycleError::Source(e) => (Some(e.kind()), e.status()),
            CycleError::Store(_) => (None, None),
        };
        self.emit(MonitorEvent::SourceError {
            source: self.source,
            kind,
            status,
            message: error.to_string(),
            consecutive_failures: failures,
            retry_in_secs: delay.as_secs(),
        });
        if !self.degraded && failures >= self.settings.degraded_after {
            self.degraded = true;
            self.emit(MonitorEvent::SourceDegraded {
                source: self.source,
                consecutive_failures: failures,
            });
        }
        delay
    }

    fn set_state(&mut self, state: RunnerState) {
        self.state = state;
        self.emit(MonitorEvent::StateChanged {
            source: self.source,
            state,
        });
    }

    fn emit(&self, event: MonitorEvent) {
        // The receiver only goes away once the monitor is torn down.
        let _ = self.events.send(event);
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
