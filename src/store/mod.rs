// src/store/mod.rs
//! Document-store seam. Articles are keyed by `id`; writes are upserts only.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Article, Platform};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    PublishedAtDesc,
    FetchedAtDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Platform,
    Author,
}

/// Filter + sort + 1-based page. `page_size == 0` means "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleQuery {
    pub platform: Option<Platform>,
    pub author: Option<String>,
    pub sort: SortOrder,
    pub page: usize,
    pub page_size: usize,
}

impl ArticleQuery {
    pub fn matches(&self, a: &Article) -> bool {
        self.platform.map_or(true, |p| a.platform == p)
            && self.author.as_deref().map_or(true, |au| a.author == au)
    }

    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// One `(platform, author)` group as computed by [`ArticleStore::activity_since`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub platform: Platform,
    pub author: String,
    pub total_count: usize,
    /// Articles published at or after the `since` instant.
    pub recent_count: usize,
    pub latest_published: DateTime<Utc>,
    pub latest_fetched: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert when `id` is new, otherwise overwrite every field.
    async fn upsert(&self, article: Article) -> Result<UpsertOutcome, StoreError>;
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;
    async fn query(&self, q: &ArticleQuery) -> Result<Page<Article>, StoreError>;
    /// Counts sorted by value ascending.
    async fn count_grouped_by(&self, field: GroupField) -> Result<Vec<(String, usize)>, StoreError>;
    /// Per `(platform, author)` totals, unsorted.
    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRow>, StoreError>;
}

/// Shared ordering + paging over an in-memory article set; used by both backends.
pub(crate) fn select_page(mut all: Vec<Article>, q: &ArticleQuery) -> Page<Article> {
    all.retain(|a| q.matches(a));
    match q.sort {
        SortOrder::PublishedAtDesc => all.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::FetchedAtDesc => all.sort_by(|a, b| {
            b.fetched_at
                .cmp(&a.fetched_at)
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
    let total = all.len();
    let items = if q.page_size == 0 {
        all
    } else {
        all.into_iter().skip(q.offset()).take(q.page_size).collect()
    };
    Page { items, total }
}

pub(crate) fn group_counts<'a>(
    articles: impl Iterator<Item = &'a Article>,
    field: GroupField,
) -> Vec<(String, usize)> {
    let mut counts = std::collections::BTreeMap::<String, usize>::new();
    for a in articles {
        let key = match field {
            GroupField::Platform => a.platform.as_str().to_string(),
            GroupField::Author => a.author.clone(),
        };
        *counts.entry(key).or_default() += 1;
    }
    counts.into_iter().collect()
}

pub(crate) fn activity_rows<'a>(
    articles: impl Iterator<Item = &'a Article>,
    since: DateTime<Utc>,
) -> Vec<ActivityRow> {
    let mut groups = std::collections::HashMap::<(Platform, String), ActivityRow>::new();
    for a in articles {
        let row = groups
            .entry((a.platform, a.author.clone()))
            .or_insert_with(|| ActivityRow {
                platform: a.platform,
                author: a.author.clone(),
                total_count: 0,
                recent_count: 0,
                latest_published: a.published_at,
                latest_fetched: a.fetched_at,
            });
        row.total_count += 1;
        if a.published_at >= since {
            row.recent_count += 1;
        }
        row.latest_published = row.latest_published.max(a.published_at);
        row.latest_fetched = row.latest_fetched.max(a.fetched_at);
    }
    groups.into_values().collect()
}
