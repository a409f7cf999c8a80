// src/cache.rs
//! Short-lived cache of preview results. Owned by whoever runs previews;
//! time comes from an injected [`Clock`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Article, Platform};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut n) = self.now.lock() {
            *n += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    articles: Vec<Article>,
    stored_at: DateTime<Utc>,
}

pub struct FeedCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<Platform, Entry>>,
}

impl FeedCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    fn age(&self, e: &Entry) -> Duration {
        (self.clock.now() - e.stored_at).to_std().unwrap_or_default()
    }

    /// Cached articles if still within the TTL.
    pub fn get(&self, platform: Platform) -> Option<Vec<Article>> {
        let entries = self.entries.lock().ok()?;
        let e = entries.get(&platform)?;
        (self.age(e) < self.ttl).then(|| e.articles.clone())
    }

    pub fn set(&self, platform: Platform, articles: Vec<Article>) {
        let stored_at = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(platform, Entry { articles, stored_at });
        }
    }

    /// Drop one platform, or everything when `None`.
    pub fn clear(&self, platform: Option<Platform>) {
        if let Ok(mut entries) = self.entries.lock() {
            match platform {
                Some(p) => {
                    entries.remove(&p);
                }
                None => entries.clear(),
            }
        }
    }

    pub fn is_valid(&self, platform: Platform) -> bool {
        self.remaining_ttl(platform).is_some()
    }

    pub fn last_updated(&self, platform: Platform) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().ok()?;
        entries.get(&platform).map(|e| e.stored_at)
    }

    pub fn remaining_ttl(&self, platform: Platform) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let e = entries.get(&platform)?;
        self.ttl.checked_sub(self.age(e)).filter(|d| !d.is_zero())
    }
}
