// src/ingest/backoff.rs
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pacing and retry limits for one platform pass. Adapters never sleep;
/// every delay in a run comes from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Uniform jitter applied as `±jitter_ms` around each wait.
    pub jitter_ms: u64,
    /// Attempts per target before it is marked failed.
    pub max_attempts: u32,
    /// Upper bound on rounds per run; leftovers are closed as failed.
    pub max_rounds: u32,
    pub request_timeout_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 15_000,
            multiplier: 2.0,
            max_interval_ms: 60_000,
            jitter_ms: 2_000,
            max_attempts: 10,
            max_rounds: 10,
            request_timeout_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.min(self.max_interval_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Next round's base interval: `current * multiplier`, clamped to the max.
    pub fn grow(&self, current: Duration) -> Duration {
        let max = Duration::from_millis(self.max_interval_ms);
        let factor = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let next = current.as_secs_f64() * factor;
        if next >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(next)
        }
    }

    /// `base ± jitter`, never below zero.
    pub fn jittered(&self, base: Duration) -> Duration {
        self.jittered_with(base, &mut rand::rng())
    }

    pub fn jittered_with<R: Rng + ?Sized>(&self, base: Duration, rng: &mut R) -> Duration {
        if self.jitter_ms == 0 {
            return base;
        }
        let j = i64::try_from(self.jitter_ms).unwrap_or(i64::MAX);
        let offset = rng.random_range(-j..=j);
        let base_ms = i64::try_from(base.as_millis()).unwrap_or(i64::MAX);
        let ms = base_ms.saturating_add(offset).max(0);
        Duration::from_millis(ms.unsigned_abs())
    }

    /// Shortest wait a jittered `base` can produce.
    pub fn jitter_floor(&self, base: Duration) -> Duration {
        base.saturating_sub(Duration::from_millis(self.jitter_ms))
    }
}
