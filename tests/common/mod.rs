// Shared fakes for the integration tests: scripted adapters, a recording
// notification surface, and throwaway SQLite paths.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobmonitor::error::SourceError;
use jobmonitor::models::listing::{Listing, SourceId};
use jobmonitor::notify::NotificationSurface;
use jobmonitor::runner::{BackoffPolicy, RunnerSettings};
use jobmonitor::sources::SourceAdapter;

pub fn listing(source: SourceId, id: &str) -> Listing {
    let mut l = Listing::new(source, id);
    l.title = format!("Engineer {id}");
    l.company = "Ferris Labs".to_string();
    l.location = "Remote".to_string();
    l.url = format!("https://jobs.example/{source}/{id}");
    l
}

pub fn settings(check_interval_secs: u64) -> RunnerSettings {
    RunnerSettings {
        check_interval: Duration::from_secs(check_interval_secs),
        fetch_timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(1800)),
        degraded_after: 5,
        baseline_empty: false,
    }
}

pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("jobmonitor-test-{}.db", uuid::Uuid::new_v4()))
}

pub fn remove_db(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.clone().into_os_string();
        p.push(suffix);
        let _ = std::fs::remove_file(p);
    }
}

/// Plays back `script` one call at a time, then keeps returning `steady`.
pub struct ScriptedAdapter {
    source: SourceId,
    script: Mutex<VecDeque<Result<Vec<Listing>, SourceError>>>,
    steady: Result<Vec<Listing>, SourceError>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    pub fn steady(source: SourceId, listings: Vec<Listing>) -> Self {
        Self {
            source,
            script: Mutex::new(VecDeque::new()),
            steady: Ok(listings),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(source: SourceId) -> Self {
        Self {
            source,
            script: Mutex::new(VecDeque::new()),
            steady: Err(SourceError::TransientNetwork("connection refused".to_string())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_script(mut self, script: Vec<Result<Vec<Listing>, SourceError>>) -> Self {
        self.script = Mutex::new(script.into());
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_id(&self) -> SourceId {
        self.source
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.steady.clone())
    }
}

/// Panics on its first call, then returns `listings` every time.
pub struct PanicOnceAdapter {
    source: SourceId,
    listings: Vec<Listing>,
    calls: Arc<AtomicUsize>,
}

impl PanicOnceAdapter {
    pub fn new(source: SourceId, listings: Vec<Listing>) -> Self {
        Self {
            source,
            listings,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl SourceAdapter for PanicOnceAdapter {
    fn source_id(&self) -> SourceId {
        self.source
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("unexpected table layout");
        }
        Ok(self.listings.clone())
    }
}

/// Never answers.
pub struct HangingAdapter(pub SourceId);

#[async_trait]
impl SourceAdapter for HangingAdapter {
    fn source_id(&self) -> SourceId {
        self.0
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>, SourceError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok(Vec::new())
    }
}

/// Records every delivered url; fails the first `fail_first` calls.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    pub delivered: Arc<Mutex<Vec<String>>>,
    fail_first: Arc<AtomicUsize>,
}

impl RecordingSurface {
    pub fn failing_first(n: usize) -> Self {
        Self {
            delivered: Arc::default(),
            fail_first: Arc::new(AtomicUsize::new(n)),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSurface for RecordingSurface {
    async fn notify(&self, _title: &str, _body: &str, url: &str) -> anyhow::Result<()> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("notifier unavailable");
        }
        self.delivered.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
