// tests/common/mod.rs
// Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use content_aggregator::ingest::types::{Candidate, FetchError, SourceAdapter};
use content_aggregator::model::{Article, Platform, SourceTarget};
use content_aggregator::store::{
    memory::MemoryStore, ActivityRow, ArticleQuery, ArticleStore, GroupField, Page, StoreError,
    UpsertOutcome,
};
use parking_lot::Mutex;

pub fn article(id: &str, platform: Platform, author: &str, published_at: DateTime<Utc>) -> Article {
    Article {
        id: id.to_string(),
        title: format!("title {id}"),
        description: "No description available".to_string(),
        link: format!("https://example.test/{id}"),
        thumbnail: None,
        platform,
        author: author.to_string(),
        category: None,
        published_at,
        fetched_at: published_at,
    }
}

pub fn candidate(platform: Platform, id: &str, author: &str) -> Candidate {
    let mut c = Candidate::new(platform, &format!("title {id}"), &format!("https://example.test/{id}"), author);
    c.id = Some(id.to_string());
    c.description = format!("description for {id}");
    c
}

/// Scripted adapter keyed by target identifier. Each call pops the next
/// scripted result; an exhausted script repeats its last entry. Records every
/// call with the (tokio) time it happened.
#[derive(Default)]
pub struct ScriptedAdapter {
    scripts: Mutex<HashMap<String, VecDeque<Result<Vec<Candidate>, FetchError>>>>,
    last: Mutex<HashMap<String, Result<Vec<Candidate>, FetchError>>>,
    pub calls: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, identifier: &str, results: Vec<Result<Vec<Candidate>, FetchError>>) -> Self {
        self.scripts
            .lock()
            .insert(identifier.to_string(), results.into());
        self
    }

    pub fn calls_for(&self, identifier: &str) -> Vec<tokio::time::Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(id, _)| id == identifier)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch(&self, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError> {
        let id = target.identifier.clone();
        self.calls
            .lock()
            .push((id.clone(), tokio::time::Instant::now()));
        let next = self
            .scripts
            .lock()
            .get_mut(&id)
            .and_then(|q| q.pop_front());
        let mut last = self.last.lock();
        match next {
            Some(r) => {
                last.insert(id, r.clone());
                r
            }
            None => last
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Network(format!("no script for {id}")))),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Memory store that refuses to write the listed ids.
pub struct FlakyStore {
    pub inner: MemoryStore,
    failing: HashSet<String>,
}

impl FlakyStore {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArticleStore for FlakyStore {
    async fn upsert(&self, article: Article) -> Result<UpsertOutcome, StoreError> {
        if self.failing.contains(&article.id) {
            return Err(StoreError::Unavailable(format!("refusing {}", article.id)));
        }
        self.inner.upsert(article).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }

    async fn query(&self, q: &ArticleQuery) -> Result<Page<Article>, StoreError> {
        self.inner.query(q).await
    }

    async fn count_grouped_by(&self, field: GroupField) -> Result<Vec<(String, usize)>, StoreError> {
        self.inner.count_grouped_by(field).await
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRow>, StoreError> {
        self.inner.activity_since(since).await
    }
}
