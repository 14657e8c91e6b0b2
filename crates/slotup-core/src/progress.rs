//! Progress and completion reporting.
//!
//! The orchestrator pushes [`ProgressEvent`]s onto a channel as it
//! works; the engine drains the channel on a forwarder thread and hands
//! events to the caller's callback. Percentages are coarse checkpoints,
//! not byte-accurate accounting, and are non-decreasing within a run.

use std::sync::mpsc::{channel, Receiver, Sender};

use tracing::debug;

/// One progress notification.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// 0..=100 checkpoint.
    pub percentage: i32,
    /// Human-readable step description.
    pub message: String,
    /// 0 for pipeline steps, 1 for nested per-image work.
    pub depth: u32,
}

/// Terminal outcome of an install run.
#[derive(Debug, Clone)]
pub struct InstallResult {
    pub success: bool,
    /// Surfaced verbatim to the calling agent.
    pub message: String,
}

/// Sending half of the progress channel, handed to the orchestrator.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a connected reporter/receiver pair.
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that drops every event. For callers that do not watch
    /// progress.
    pub fn sink() -> Self {
        Self { tx: None }
    }

    /// Emit one checkpoint. A disconnected receiver is not an error;
    /// progress must never fail an install.
    pub fn report(&self, percentage: i32, message: impl Into<String>, depth: u32) {
        let message = message.into();
        debug!(percentage, depth, message = %message, "progress");
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                percentage,
                message,
                depth,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_events_in_order() {
        let (reporter, rx) = ProgressReporter::channel();
        reporter.report(0, "start", 0);
        reporter.report(50, "half", 1);
        reporter.report(100, "done", 0);
        drop(reporter);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].percentage, 0);
        assert_eq!(events[1].depth, 1);
        assert_eq!(events[2].message, "done");
    }

    #[test]
    fn sink_accepts_events() {
        let reporter = ProgressReporter::sink();
        reporter.report(10, "into the void", 0);
    }

    #[test]
    fn disconnected_receiver_is_not_an_error() {
        let (reporter, rx) = ProgressReporter::channel();
        drop(rx);
        reporter.report(10, "nobody listening", 0);
    }
}
