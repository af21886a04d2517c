// Startup from configuration: credential resolution happens once and only
// affects the source that lacks one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use jobmonitor::config::ConfigFile;
use jobmonitor::credentials::StaticSecretStore;
use jobmonitor::dedup::MemoryDedupStore;
use jobmonitor::models::listing::SourceId;
use jobmonitor::monitor::{Monitor, SeedOutcome, resolve_sources};
use jobmonitor::notify::{LogSurface, NotificationDispatcher};
use jobmonitor::runner::{RunnerSettings, RunnerState};

use common::ScriptedAdapter;

#[tokio::test]
async fn missing_credential_disables_only_that_source() {
    let config = ConfigFile {
        github: None,
        linkedin: None,
        ..ConfigFile::default()
    }
    .into_monitor_config()
    .unwrap();

    let mut sources = resolve_sources(&config, &StaticSecretStore::new());
    assert!(sources.adapters.is_empty());
    assert_eq!(sources.disabled.len(), 1);
    sources
        .adapters
        .push(Box::new(ScriptedAdapter::steady(SourceId::Github, vec![])));

    let monitor = Monitor::spawn_resolved(
        RunnerSettings::from(&config),
        sources,
        Arc::new(MemoryDedupStore::new()),
        NotificationDispatcher::new(Arc::new(LogSurface)),
    );
    let status = monitor.status();

    let mut jobright = None;
    for _ in 0..200 {
        jobright = status
            .source(SourceId::Jobright)
            .await
            .filter(|s| s.disabled_reason.is_some());
        if jobright.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let jobright = jobright.expect("jobright should be reported as disabled");
    assert_eq!(jobright.state, RunnerState::Stopped);
    assert!(jobright.disabled_reason.unwrap().contains("jobright"));

    let github = status.source(SourceId::Github).await.unwrap();
    assert_eq!(github.disabled_reason, None);
    assert!(monitor.is_running());

    let report = monitor.stop(Duration::from_secs(3)).await;
    assert_eq!(report.stopped, vec![SourceId::Github]);
    assert!(report.aborted.is_empty());
}

#[tokio::test]
async fn seeding_reports_disabled_sources() {
    let config = ConfigFile {
        github: None,
        linkedin: None,
        ..ConfigFile::default()
    }
    .into_monitor_config()
    .unwrap();

    let outcomes = Monitor::seed(
        &config,
        &StaticSecretStore::new(),
        Arc::new(MemoryDedupStore::new()),
    )
    .await;

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes.get(&SourceId::Jobright),
        Some(SeedOutcome::Disabled(_))
    ));
}
