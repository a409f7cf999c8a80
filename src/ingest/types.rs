// src/ingest/types.rs
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{Platform, SourceTarget};

/// Pre-normalization record produced by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Upstream-stable id when the adapter could recover one.
    pub id: Option<String>,
    pub title: String,
    /// Raw description; may still carry markup and entities.
    pub description: String,
    pub link: String,
    pub thumbnail: Option<String>,
    pub platform: Platform,
    pub author: String,
    pub category: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Candidate {
    pub fn new(platform: Platform, title: &str, link: &str, author: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            description: String::new(),
            link: link.to_string(),
            thumbnail: None,
            platform,
            author: author.to_string(),
            category: None,
            published_at: None,
        }
    }
}

/// Why one target fetch failed. Every variant is retryable by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}")]
    Status { status: u16 },

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("unexpected response format: {0}")]
    ContentType(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unparseable payload: {0}")]
    Parse(String),

    #[error("all {attempted} feed instances failed; last error: {last}")]
    AllInstancesExhausted { attempted: usize, last: String },
}

impl FetchError {
    pub fn is_rate_limit(&self) -> bool {
        match self {
            FetchError::RateLimited(_) => true,
            FetchError::AllInstancesExhausted { last, .. } => last.starts_with("rate limited"),
            _ => false,
        }
    }
}

/// One upstream integration. Adapters never sleep and never retry on their own;
/// pacing belongs to the scheduler.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError>;
    fn name(&self) -> &'static str;
}
