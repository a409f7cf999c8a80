// src/ingest/providers/mod.rs
pub mod embedded_json;
pub mod feed;
pub mod scrape;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::SourceAdapter;
use crate::model::Platform;

/// Items kept per target fetch.
pub const MAX_ITEMS_PER_TARGET: usize = 5;

/// Platform → adapter, fixed at construction.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<Platform, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform: Platform, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(platform, adapter);
        self
    }

    pub fn register(&mut self, platform: Platform, adapter: Arc<dyn SourceAdapter>) {
        if let Some(old) = self.adapters.insert(platform, adapter) {
            tracing::debug!(%platform, replaced = old.name(), "adapter replaced");
        }
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.adapters.keys().copied().collect()
    }
}

pub(crate) fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// RFC 2822 (`pubDate`) or RFC 3339 (`published`/`updated`).
pub(crate) fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    OffsetDateTime::parse(s, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc3339))
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()))
        // obsolete zone names such as "GMT"
        .or_else(|| {
            DateTime::parse_from_rfc2822(s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        })
}

/// Resolve `url` against `origin` (`//host/x`, `/x`, or already absolute).
pub(crate) fn absolute_url(origin: &str, url: &str) -> String {
    let u = url.trim();
    if u.starts_with("http://") || u.starts_with("https://") {
        u.to_string()
    } else if let Some(rest) = u.strip_prefix("//") {
        format!("https://{rest}")
    } else if u.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), u)
    } else {
        format!("{}/{}", origin.trim_end_matches('/'), u)
    }
}
