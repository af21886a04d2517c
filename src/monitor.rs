use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::credentials::SecretStore;
use crate::dedup::DedupStore;
use crate::events::MonitorEvent;
use crate::models::listing::SourceId;
use crate::notify::{LogSurface, NotificationDispatcher};
use crate::runner::{RunnerSettings, RunnerState, SourceRunner};
use crate::sources::{SourceAdapter, build_adapter};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub source: SourceId,
    pub state: RunnerState,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub listings_notified: u64,
    pub disabled_reason: Option<String>,
}

impl SourceStatus {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            state: RunnerState::Idle,
            cycles: 0,
            consecutive_failures: 0,
            degraded: false,
            last_error: None,
            last_success_at: None,
            listings_notified: 0,
            disabled_reason: None,
        }
    }

    fn apply(&mut self, event: &MonitorEvent) {
        match event {
            MonitorEvent::StateChanged { state, .. } => self.state = *state,
            MonitorEvent::CycleCompleted { notified, .. } => {
                self.cycles += 1;
                self.consecutive_failures = 0;
                self.last_success_at = Some(Utc::now());
                self.listings_notified += *notified as u64;
            }
            MonitorEvent::SourceError {
                message,
                consecutive_failures,
                ..
            } => {
                self.cycles += 1;
                self.consecutive_failures = *consecutive_failures;
                self.last_error = Some(message.clone());
            }
            MonitorEvent::SourceDegraded { .. } => self.degraded = true,
            MonitorEvent::SourceRecovered { .. } => self.degraded = false,
            MonitorEvent::SourceDisabled { reason, .. } => {
                self.state = RunnerState::Stopped;
                self.disabled_reason = Some(reason.clone());
            }
            MonitorEvent::ListingFound { .. }
            | MonitorEvent::DispatchFailed { .. }
            | MonitorEvent::MarkSeenFailed { .. }
            | MonitorEvent::BaselineRecorded { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub run_id: Uuid,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug)]
struct StatusBoard {
    run_id: Uuid,
    running: bool,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
    sources: BTreeMap<SourceId, SourceStatus>,
}

/// Shared, read-mostly view of the monitor, updated from the event stream.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    board: Arc<RwLock<StatusBoard>>,
}

impl StatusHandle {
    fn new(sources: impl IntoIterator<Item = SourceId>) -> Self {
        let board = StatusBoard {
            run_id: Uuid::new_v4(),
            running: true,
            started_at: Utc::now(),
            stopped_at: None,
            sources: sources
                .into_iter()
                .map(|s| (s, SourceStatus::new(s)))
                .collect(),
        };
        Self {
            board: Arc::new(RwLock::new(board)),
        }
    }

    pub async fn snapshot(&self) -> MonitorStatus {
        let board = self.board.read().await;
        MonitorStatus {
            run_id: board.run_id,
            running: board.running,
            started_at: board.started_at,
            stopped_at: board.stopped_at,
            sources: board.sources.values().cloned().collect(),
        }
    }

    pub async fn source(&self, source: SourceId) -> Option<SourceStatus> {
        self.board.read().await.sources.get(&source).cloned()
    }

    async fn apply(&self, event: &MonitorEvent) {
        let mut board = self.board.write().await;
        board
            .sources
            .entry(event.source())
            .or_insert_with(|| SourceStatus::new(event.source()))
            .apply(event);
    }

    async fn mark_stopped(&self, aborted: &[SourceId]) {
        let mut board = self.board.write().await;
        board.running = false;
        board.stopped_at = Some(Utc::now());
        for source in aborted {
            if let Some(status) = board.sources.get_mut(source) {
                status.state = RunnerState::Stopped;
            }
        }
    }
}

/// What happened to each runner during `stop`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Finished within the grace period.
    pub stopped: Vec<SourceId>,
    /// Still busy when the grace period ran out, or panicked.
    pub aborted: Vec<SourceId>,
}

/// Result of seeding one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    Seeded(usize),
    Failed(String),
    Disabled(String),
}

/// Owns one polling task per source plus the event forwarder.
pub struct Monitor {
    cancel: CancellationToken,
    runners: Vec<(SourceId, JoinHandle<RunnerState>)>,
    forwarder: JoinHandle<()>,
    status: StatusHandle,
}

impl Monitor {
    /// Build and start a runner for every configured source.
    ///
    /// A source whose credential is missing is reported once and left out;
    /// the others start normally.
    pub fn start(
        config: &MonitorConfig,
        secrets: &dyn SecretStore,
        store: Arc<dyn DedupStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self::spawn_resolved(
            RunnerSettings::from(config),
            resolve_sources(config, secrets),
            store,
            dispatcher,
        )
    }

    /// Start runners for adapters that are already built.
    pub fn spawn(
        settings: RunnerSettings,
        adapters: Vec<Box<dyn SourceAdapter>>,
        store: Arc<dyn DedupStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let sources = ResolvedSources {
            adapters,
            disabled: Vec::new(),
        };
        Self::spawn_resolved(settings, sources, store, dispatcher)
    }

    /// Start runners for `sources.adapters` and report `sources.disabled`.
    pub fn spawn_resolved(
        settings: RunnerSettings,
        sources: ResolvedSources,
        store: Arc<dyn DedupStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let ResolvedSources { adapters, disabled } = sources;
        let status = StatusHandle::new(
            adapters
                .iter()
                .map(|a| a.source_id())
                .chain(disabled.iter().map(|(s, _)| *s)),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_events(rx, status.clone()));
        report_disabled(&tx, disabled);

        let cancel = CancellationToken::new();
        let runners = adapters
            .into_iter()
            .map(|adapter| {
                let runner = SourceRunner::new(
                    adapter,
                    store.clone(),
                    dispatcher.clone(),
                    settings,
                    tx.clone(),
                    cancel.clone(),
                );
                let source = runner.source_id();
                tracing::info!(
                    "Starting {source} runner, polling every {}s",
                    settings.check_interval.as_secs()
                );
                (source, tokio::spawn(runner.run()))
            })
            .collect();

        Self {
            cancel,
            runners,
            forwarder,
            status,
        }
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Token that stops every runner when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.runners.iter().any(|(_, h)| !h.is_finished())
    }

    /// Cancel all runners and wait up to `grace` for in-flight cycles to
    /// finish. Runners still busy after that are aborted.
    pub async fn stop(self, grace: Duration) -> ShutdownReport {
        tracing::info!("Stopping {} runners", self.runners.len());
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();
        for (source, mut handle) in self.runners {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(_)) => report.stopped.push(source),
                Ok(Err(e)) => {
                    tracing::error!("{source} runner failed: {e}");
                    report.aborted.push(source);
                }
                Err(_) => {
                    tracing::warn!(
                        "{source} runner still busy after {}s, aborting",
                        grace.as_secs_f32()
                    );
                    handle.abort();
                    let _ = handle.await;
                    report.aborted.push(source);
                }
            }
        }

        // Every sender is gone now, so the forwarder drains and exits.
        if let Err(e) = self.forwarder.await {
            tracing::error!("Event forwarder failed: {e}");
        }
        self.status.mark_stopped(&report.aborted).await;
        tracing::info!(
            "Monitor stopped ({} clean, {} aborted)",
            report.stopped.len(),
            report.aborted.len()
        );
        report
    }

    /// Fetch every configured source once, concurrently, and mark all
    /// returned listings as seen without notifying.
    pub async fn seed(
        config: &MonitorConfig,
        secrets: &dyn SecretStore,
        store: Arc<dyn DedupStore>,
    ) -> BTreeMap<SourceId, SeedOutcome> {
        let ResolvedSources { adapters, disabled } = resolve_sources(config, secrets);
        let settings = RunnerSettings::from(config);
        let dispatcher = NotificationDispatcher::new(Arc::new(LogSurface));
        let status = StatusHandle::new(Vec::<SourceId>::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_events(rx, status));

        let mut outcomes: BTreeMap<SourceId, SeedOutcome> = disabled
            .iter()
            .map(|(s, reason)| (*s, SeedOutcome::Disabled(reason.clone())))
            .collect();
        report_disabled(&tx, disabled);

        let mut tasks = JoinSet::new();
        for adapter in adapters {
            let mut runner = SourceRunner::new(
                adapter,
                store.clone(),
                dispatcher.clone(),
                settings,
                tx.clone(),
                CancellationToken::new(),
            );
            tasks.spawn(async move {
                let source = runner.source_id();
                (source, runner.seed().await)
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(count))) => {
                    tracing::info!("Seeded {count} {source} listings");
                    outcomes.insert(source, SeedOutcome::Seeded(count));
                }
                Ok((source, Err(e))) => {
                    tracing::warn!("Seeding {source} failed: {e}");
                    outcomes.insert(source, SeedOutcome::Failed(e.to_string()));
                }
                Err(e) => tracing::error!("Seed task failed: {e}"),
            }
        }
        let _ = forwarder.await;
        outcomes
    }
}

/// Configured sources split into runnable adapters and those left out.
#[derive(Default)]
pub struct ResolvedSources {
    pub adapters: Vec<Box<dyn SourceAdapter>>,
    /// Source and the reason it cannot run.
    pub disabled: Vec<(SourceId, String)>,
}

/// Build an adapter for every configured source, resolving credentials once.
pub fn resolve_sources(config: &MonitorConfig, secrets: &dyn SecretStore) -> ResolvedSources {
    let mut resolved = ResolvedSources::default();
    for source in &config.sources {
        match build_adapter(source, secrets) {
            Ok(adapter) => resolved.adapters.push(adapter),
            Err(missing) => resolved.disabled.push((source.id(), missing.to_string())),
        }
    }
    resolved
}

fn report_disabled(tx: &UnboundedSender<MonitorEvent>, disabled: Vec<(SourceId, String)>) {
    for (source, reason) in disabled {
        let _ = tx.send(MonitorEvent::SourceDisabled { source, reason });
    }
}

async fn forward_events(mut rx: UnboundedReceiver<MonitorEvent>, status: StatusHandle) {
    while let Some(event) = rx.recv().await {
        event.log();
        status.apply(&event).await;
    }
}
