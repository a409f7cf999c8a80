// src/progress.rs
//! Run events, logged through tracing and optionally streamed to a caller.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::model::Platform;
use crate::persist::SaveStats;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PlatformStarted { platform: Platform, targets: usize },
    PlatformSkipped { platform: Platform, reason: String },
    RoundStarted { platform: Platform, round: u32, pending: usize },
    Waiting { platform: Platform, wait: Duration },
    AttemptStarted { platform: Platform, target: String, attempt: u32 },
    TargetSucceeded { platform: Platform, target: String, fetched: usize, saved: SaveStats },
    TargetRetry { platform: Platform, target: String, attempt: u32, error: String },
    TargetFailed { platform: Platform, target: String, attempts: u32, error: String },
    PlatformFinished { platform: Platform, succeeded: usize, failed: usize, cancelled: bool },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProgressEvent::*;
        match self {
            PlatformStarted { platform, targets } => {
                write!(f, "[{platform}] starting with {targets} target(s)")
            }
            PlatformSkipped { platform, reason } => write!(f, "[{platform}] skipped: {reason}"),
            RoundStarted { platform, round, pending } => {
                write!(f, "[{platform}] round {round}: {pending} pending")
            }
            Waiting { platform, wait } => {
                write!(f, "[{platform}] waiting {:.1}s", wait.as_secs_f64())
            }
            AttemptStarted { platform, target, attempt } => {
                write!(f, "[{platform}] fetching {target} (attempt {attempt})")
            }
            TargetSucceeded { platform, target, fetched, saved } => write!(
                f,
                "[{platform}] {target}: {fetched} item(s), {} new, {} updated, {} failed",
                saved.created, saved.updated, saved.failed
            ),
            TargetRetry { platform, target, attempt, error } => {
                write!(f, "[{platform}] {target}: attempt {attempt} failed, will retry: {error}")
            }
            TargetFailed { platform, target, attempts, error } => {
                write!(f, "[{platform}] {target}: giving up after {attempts} attempt(s): {error}")
            }
            PlatformFinished { platform, succeeded, failed, cancelled } => {
                write!(f, "[{platform}] done: {succeeded} succeeded, {failed} failed")?;
                if *cancelled {
                    f.write_str(" (cancelled)")?;
                }
                Ok(())
            }
        }
    }
}

/// Cloneable event sink. Without a channel it only logs.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::TargetRetry { .. } | ProgressEvent::TargetFailed { .. } => {
                tracing::warn!(target: "ingest", "{event}")
            }
            ProgressEvent::Waiting { .. } | ProgressEvent::AttemptStarted { .. } => {
                tracing::debug!(target: "ingest", "{event}")
            }
            _ => tracing::info!(target: "ingest", "{event}"),
        }
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_receives_events_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::RoundStarted {
            platform: Platform::YouTube,
            round: 1,
            pending: 2,
        });
        sink.emit(ProgressEvent::PlatformFinished {
            platform: Platform::YouTube,
            succeeded: 2,
            failed: 0,
            cancelled: false,
        });
        drop(sink);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.to_string(), "[YouTube] round 1: 2 pending");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.to_string(), "[YouTube] done: 2 succeeded, 0 failed");
        assert!(rx.recv().await.is_none());
    }
}
