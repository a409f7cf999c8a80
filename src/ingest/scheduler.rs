// src/ingest/scheduler.rs
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ingest::{
    backoff::BackoffPolicy,
    ensure_metrics_described, normalize_dedup,
    tracker::{FetchReport, RetryTracker, TargetState},
    types::{FetchError, SourceAdapter},
    Deduplicator,
};
use crate::model::{Platform, SourceTarget};
use crate::persist::PersistenceGateway;
use crate::progress::{ProgressEvent, ProgressSink};

/// Drives one platform's targets through rounds of sequential attempts.
/// Targets are never fetched concurrently; each success is persisted before
/// it is marked succeeded.
pub struct Orchestrator {
    policy: BackoffPolicy,
    gateway: PersistenceGateway,
    progress: ProgressSink,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(policy: BackoffPolicy, gateway: PersistenceGateway) -> Self {
        Self {
            policy,
            gateway,
            progress: ProgressSink::silent(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sleep unless cancelled first. `false` means the run should stop.
    async fn pause(&self, platform: Platform, wait: Duration) -> bool {
        self.progress.emit(ProgressEvent::Waiting { platform, wait });
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    pub async fn run(
        &self,
        platform: Platform,
        adapter: &dyn SourceAdapter,
        targets: Vec<SourceTarget>,
    ) -> FetchReport {
        ensure_metrics_described();
        self.progress.emit(ProgressEvent::PlatformStarted {
            platform,
            targets: targets.len(),
        });

        let mut tracker = RetryTracker::new(targets, self.policy.max_attempts);
        let mut dedup = Deduplicator::new();
        let mut interval = self.policy.initial_interval();
        let mut rounds = 0u32;
        let mut cancelled = false;

        'rounds: while tracker.has_pending() && rounds < self.policy.max_rounds {
            if rounds > 0 {
                interval = self.policy.grow(interval);
                if !self.pause(platform, self.policy.jittered(interval)).await {
                    cancelled = true;
                    break;
                }
            }
            rounds += 1;
            let pending = tracker.pending();
            self.progress.emit(ProgressEvent::RoundStarted {
                platform,
                round: rounds,
                pending: pending.len(),
            });

            for (pos, &idx) in pending.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'rounds;
                }
                self.attempt(platform, adapter, &mut tracker, idx, &mut dedup)
                    .await;
                if pos + 1 < pending.len()
                    && !self.pause(platform, self.policy.jittered(interval)).await
                {
                    cancelled = true;
                    break 'rounds;
                }
            }
        }

        let cut = tracker.force_close();
        if cut > 0 {
            tracing::warn!(%platform, cut, rounds, cancelled, "closing targets still pending");
        }
        let report = tracker.into_report(platform, rounds, cancelled);
        gauge!("pipeline_last_run_ts", "platform" => platform.as_str())
            .set(Utc::now().timestamp().max(0) as f64);
        self.progress.emit(ProgressEvent::PlatformFinished {
            platform,
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
            cancelled,
        });
        report
    }

    async fn attempt(
        &self,
        platform: Platform,
        adapter: &dyn SourceAdapter,
        tracker: &mut RetryTracker,
        idx: usize,
        dedup: &mut Deduplicator,
    ) {
        let started = Instant::now();
        let attempt = tracker.record_attempt(idx, started);
        let target = tracker.entry(idx).target.clone();
        let label = target.to_string();
        counter!("fetch_attempts_total", "platform" => platform.as_str()).increment(1);
        self.progress.emit(ProgressEvent::AttemptStarted {
            platform,
            target: label.clone(),
            attempt,
        });

        let timeout = self.policy.request_timeout();
        let result = match tokio::time::timeout(timeout, adapter.fetch(&target)).await {
            Ok(r) => r,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };
        tracing::debug!(%platform, elapsed_ms = started.elapsed().as_millis() as u64, "fetch returned");

        match result {
            Ok(candidates) => {
                let fetched = candidates.len();
                let fetched_at = Utc::now();
                let (articles, unusable, dups) = normalize_dedup(fetched_at, candidates, dedup);
                tracing::debug!(
                    target: "ingest",
                    %platform,
                    target_name = %label,
                    kept = articles.len(),
                    unusable,
                    dups,
                    "normalized batch"
                );
                let saved = self.gateway.persist_batch(articles, fetched_at).await;
                tracker.mark_success(idx, saved);
                self.progress.emit(ProgressEvent::TargetSucceeded {
                    platform,
                    target: label,
                    fetched,
                    saved,
                });
            }
            Err(err) => {
                counter!("fetch_failures_total", "platform" => platform.as_str()).increment(1);
                if err.is_rate_limit() {
                    counter!("fetch_rate_limited_total", "platform" => platform.as_str())
                        .increment(1);
                }
                let error = err.to_string();
                match tracker.mark_retry(idx, err) {
                    TargetState::Failed => self.progress.emit(ProgressEvent::TargetFailed {
                        platform,
                        target: label,
                        attempts: attempt,
                        error,
                    }),
                    _ => self.progress.emit(ProgressEvent::TargetRetry {
                        platform,
                        target: label,
                        attempt,
                        error,
                    }),
                }
            }
        }
    }
}
