// src/ingest/tracker.rs
use serde::Serialize;
use tokio::time::Instant;

use crate::ingest::types::FetchError;
use crate::model::{Platform, SourceTarget};
use crate::persist::SaveStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Pending,
    Succeeded,
    Failed,
}

/// Per-target bookkeeping for one run.
#[derive(Debug, Clone)]
pub struct TrackerEntry {
    pub target: SourceTarget,
    pub state: TargetState,
    pub attempt_count: u32,
    pub last_error: Option<FetchError>,
    pub attempt_timestamps: Vec<Instant>,
    pub saved: Option<SaveStats>,
    /// Still pending when the round ceiling or a cancel closed the run.
    pub cut_off: bool,
}

impl TrackerEntry {
    fn new(target: SourceTarget) -> Self {
        Self {
            target,
            state: TargetState::Pending,
            attempt_count: 0,
            last_error: None,
            attempt_timestamps: Vec::new(),
            saved: None,
            cut_off: false,
        }
    }
}

#[derive(Debug)]
pub struct RetryTracker {
    entries: Vec<TrackerEntry>,
    max_attempts: u32,
}

impl RetryTracker {
    pub fn new(targets: Vec<SourceTarget>, max_attempts: u32) -> Self {
        Self {
            entries: targets.into_iter().map(TrackerEntry::new).collect(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn entry(&self, idx: usize) -> &TrackerEntry {
        &self.entries[idx]
    }

    pub fn entries(&self) -> &[TrackerEntry] {
        &self.entries
    }

    /// Pending indices in configured order.
    pub fn pending(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == TargetState::Pending)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(|e| e.state == TargetState::Pending)
    }

    pub fn record_attempt(&mut self, idx: usize, at: Instant) -> u32 {
        let e = &mut self.entries[idx];
        e.attempt_count += 1;
        e.attempt_timestamps.push(at);
        e.attempt_count
    }

    pub fn mark_success(&mut self, idx: usize, saved: SaveStats) {
        let e = &mut self.entries[idx];
        e.state = TargetState::Succeeded;
        e.saved = Some(saved);
    }

    /// Record a failed attempt. Returns `Failed` once the attempt ceiling is hit.
    pub fn mark_retry(&mut self, idx: usize, err: FetchError) -> TargetState {
        let max = self.max_attempts;
        let e = &mut self.entries[idx];
        e.last_error = Some(err);
        if e.attempt_count >= max {
            e.state = TargetState::Failed;
        }
        e.state
    }

    /// Close whatever is still pending as failed. Returns how many were closed.
    pub fn force_close(&mut self) -> usize {
        let mut n = 0;
        for e in self.entries.iter_mut().filter(|e| e.state == TargetState::Pending) {
            e.state = TargetState::Failed;
            e.cut_off = true;
            n += 1;
        }
        n
    }

    pub fn into_report(self, platform: Platform, rounds: u32, cancelled: bool) -> FetchReport {
        let mut report = FetchReport {
            platform,
            rounds,
            cancelled,
            succeeded: Vec::new(),
            failed: Vec::new(),
            pending_at_cutoff: 0,
        };
        for e in self.entries {
            match e.state {
                TargetState::Succeeded => report.succeeded.push(SucceededTarget {
                    target: e.target.display_name.clone(),
                    identifier: e.target.identifier,
                    attempts: e.attempt_count,
                    saved: e.saved.unwrap_or_default(),
                }),
                TargetState::Failed | TargetState::Pending => {
                    if e.cut_off {
                        report.pending_at_cutoff += 1;
                    }
                    report.failed.push(FailedTarget {
                        target: e.target.display_name.clone(),
                        identifier: e.target.identifier,
                        attempts: e.attempt_count,
                        error: e
                            .last_error
                            .map(|err| err.to_string())
                            .unwrap_or_else(|| "not attempted".to_string()),
                        cut_off: e.cut_off,
                    })
                }
            }
        }
        report
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SucceededTarget {
    pub target: String,
    pub identifier: String,
    pub attempts: u32,
    pub saved: SaveStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTarget {
    pub target: String,
    pub identifier: String,
    pub attempts: u32,
    pub error: String,
    pub cut_off: bool,
}

/// Outcome of one platform pass. Always produced, even when every target fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchReport {
    pub platform: Platform,
    pub rounds: u32,
    pub cancelled: bool,
    pub succeeded: Vec<SucceededTarget>,
    pub failed: Vec<FailedTarget>,
    /// Subset of `failed` that never hit the attempt ceiling.
    pub pending_at_cutoff: usize,
}

impl FetchReport {
    pub fn totals(&self) -> SaveStats {
        let mut t = SaveStats::default();
        for s in &self.succeeded {
            t.absorb(s.saved);
        }
        t
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}
