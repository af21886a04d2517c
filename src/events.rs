use serde::Serialize;

use crate::error::SourceErrorKind;
use crate::models::listing::SourceId;
use crate::runner::RunnerState;

/// Structured record emitted by runners and the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    StateChanged {
        source: SourceId,
        state: RunnerState,
    },
    ListingFound {
        source: SourceId,
        external_id: String,
        title: String,
        company: String,
        url: String,
    },
    CycleCompleted {
        source: SourceId,
        fetched: usize,
        new: usize,
        notified: usize,
    },
    SourceError {
        source: SourceId,
        kind: Option<SourceErrorKind>,
        status: Option<u16>,
        message: String,
        consecutive_failures: u32,
        retry_in_secs: u64,
    },
    SourceDegraded {
        source: SourceId,
        consecutive_failures: u32,
    },
    SourceRecovered {
        source: SourceId,
        after_failures: u32,
    },
    DispatchFailed {
        source: SourceId,
        external_id: String,
        reason: String,
    },
    MarkSeenFailed {
        source: SourceId,
        external_id: String,
        reason: String,
    },
    SourceDisabled {
        source: SourceId,
        reason: String,
    },
    BaselineRecorded {
        source: SourceId,
        recorded: usize,
    },
}

impl MonitorEvent {
    pub fn source(&self) -> SourceId {
        match self {
            MonitorEvent::StateChanged { source, .. }
            | MonitorEvent::ListingFound { source, .. }
            | MonitorEvent::CycleCompleted { source, .. }
            | MonitorEvent::SourceError { source, .. }
            | MonitorEvent::SourceDegraded { source, .. }
            | MonitorEvent::SourceRecovered { source, .. }
            | MonitorEvent::DispatchFailed { source, .. }
            | MonitorEvent::MarkSeenFailed { source, .. }
            | MonitorEvent::SourceDisabled { source, .. }
            | MonitorEvent::BaselineRecorded { source, .. } => *source,
        }
    }

    /// Write the event to the log as one record.
    pub fn log(&self) {
        let source = self.source();
        match self {
            MonitorEvent::StateChanged { state, .. } => match state {
                RunnerState::Idle | RunnerState::Stopped => {
                    tracing::info!(target: "jobmonitor::events", %source, ?state, "Runner {state:?}");
                }
                _ => tracing::debug!(target: "jobmonitor::events", %source, ?state, "state changed"),
            },
            MonitorEvent::ListingFound {
                external_id,
                title,
                company,
                url,
                ..
            } => {
                tracing::info!(
                    target: "jobmonitor::events",
                    %source,
                    %external_id,
                    %url,
                    "Listing found: {title} at {company}"
                );
            }
            MonitorEvent::CycleCompleted {
                fetched,
                new,
                notified,
                ..
            } => {
                tracing::info!(
                    target: "jobmonitor::events",
                    %source,
                    fetched,
                    new,
                    notified,
                    "Cycle completed: {fetched} fetched, {new} new, {notified} notified"
                );
            }
            MonitorEvent::SourceError {
                kind,
                status,
                message,
                consecutive_failures,
                retry_in_secs,
                ..
            } => {
                tracing::warn!(
                    target: "jobmonitor::events",
                    %source,
                    ?kind,
                    ?status,
                    consecutive_failures,
                    retry_in_secs,
                    "Source error: {message}"
                );
            }
            MonitorEvent::SourceDegraded {
                consecutive_failures,
                ..
            } => {
                tracing::error!(
                    target: "jobmonitor::events",
                    %source,
                    consecutive_failures,
                    "Source degraded after {consecutive_failures} consecutive failures, still retrying"
                );
            }
            MonitorEvent::SourceRecovered { after_failures, .. } => {
                tracing::info!(
                    target: "jobmonitor::events",
                    %source,
                    after_failures,
                    "Source recovered"
                );
            }
            MonitorEvent::DispatchFailed {
                external_id,
                reason,
                ..
            } => {
                tracing::warn!(
                    target: "jobmonitor::events",
                    %source,
                    %external_id,
                    "Notification failed, will retry next cycle: {reason}"
                );
            }
            MonitorEvent::MarkSeenFailed {
                external_id,
                reason,
                ..
            } => {
                tracing::warn!(
                    target: "jobmonitor::events",
                    %source,
                    %external_id,
                    "Notified but could not record listing, it may be notified again: {reason}"
                );
            }
            MonitorEvent::SourceDisabled { reason, .. } => {
                tracing::error!(
                    target: "jobmonitor::events",
                    %source,
                    "Source not started: {reason}"
                );
            }
            MonitorEvent::BaselineRecorded { recorded, .. } => {
                tracing::info!(
                    target: "jobmonitor::events",
                    %source,
                    recorded,
                    "No history for source, recorded {recorded} current listings without notifying"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_tag() {
        let event = MonitorEvent::SourceDegraded {
            source: SourceId::Linkedin,
            consecutive_failures: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "source_degraded");
        assert_eq!(json["source"], "linkedin");
        assert_eq!(event.source(), SourceId::Linkedin);
    }
}
