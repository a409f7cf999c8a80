// src/stats.rs
//! Read side: grouped activity, paginated listing, filter values, refresh status.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::{Article, Platform};
use crate::store::{ActivityRow, ArticleQuery, ArticleStore, GroupField, SortOrder, StoreError};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
/// Window for the "recent" count in author activity.
pub const ACTIVITY_WINDOW_DAYS: i64 = 7;

/// Per `(platform, author)` totals, last-7-day counts and latest publish time,
/// sorted by platform, then total descending.
pub async fn author_activity(
    store: &dyn ArticleStore,
    now: DateTime<Utc>,
) -> Result<Vec<ActivityRow>, StoreError> {
    let mut rows = store
        .activity_since(now - Duration::days(ACTIVITY_WINDOW_DAYS))
        .await?;
    rows.sort_by(|a, b| {
        a.platform
            .as_str()
            .cmp(b.platform.as_str())
            .then(b.total_count.cmp(&a.total_count))
            .then_with(|| a.author.cmp(&b.author))
    });
    Ok(rows)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub platform: Option<Platform>,
    pub author: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleListing {
    pub items: Vec<Article>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

/// Newest first by `publishedAt`.
pub async fn list_articles(
    store: &dyn ArticleStore,
    req: ListRequest,
) -> Result<ArticleListing, StoreError> {
    let page = req.page.unwrap_or(1).max(1);
    let page_size = req
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let q = ArticleQuery {
        platform: req.platform,
        author: req.author.filter(|a| !a.trim().is_empty()),
        sort: SortOrder::PublishedAtDesc,
        page,
        page_size,
    };
    let res = store.query(&q).await?;
    Ok(ArticleListing {
        total_pages: res.total.div_ceil(page_size),
        items: res.items,
        total: res.total,
        page,
        page_size,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

pub async fn platforms(store: &dyn ArticleStore) -> Result<Vec<ValueCount>, StoreError> {
    Ok(store
        .count_grouped_by(GroupField::Platform)
        .await?
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformAuthors {
    pub platform: Platform,
    pub authors: Vec<ValueCount>,
}

/// Authors grouped per platform (most articles first), optionally for one platform.
pub async fn authors_by_platform(
    store: &dyn ArticleStore,
    only: Option<Platform>,
) -> Result<Vec<PlatformAuthors>, StoreError> {
    let rows = store.activity_since(DateTime::<Utc>::MIN_UTC).await?;
    let mut out: Vec<PlatformAuthors> = Vec::new();
    for row in rows.into_iter().filter(|r| only.map_or(true, |p| r.platform == p)) {
        let vc = ValueCount {
            value: row.author,
            count: row.total_count,
        };
        match out.iter_mut().find(|g| g.platform == row.platform) {
            Some(g) => g.authors.push(vc),
            None => out.push(PlatformAuthors {
                platform: row.platform,
                authors: vec![vc],
            }),
        }
    }
    out.sort_by(|a, b| a.platform.as_str().cmp(b.platform.as_str()));
    for g in &mut out {
        g.authors
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub total: usize,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub platforms: Vec<ValueCount>,
}

pub async fn refresh_status(store: &dyn ArticleStore) -> Result<RefreshStatus, StoreError> {
    let latest = store
        .query(&ArticleQuery {
            sort: SortOrder::FetchedAtDesc,
            page: 1,
            page_size: 1,
            ..Default::default()
        })
        .await?;
    Ok(RefreshStatus {
        total: latest.total,
        last_fetched_at: latest.items.first().map(|a| a.fetched_at),
        platforms: platforms(store).await?,
    })
}
