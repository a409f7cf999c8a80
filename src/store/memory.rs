// src/store/memory.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    activity_rows, group_counts, select_page, ActivityRow, ArticleQuery, ArticleStore, GroupField,
    Page, StoreError, UpsertOutcome,
};
use crate::model::Article;

/// Process-local store. Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    articles: Arc<RwLock<HashMap<String, Article>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_articles(articles: impl IntoIterator<Item = Article>) -> Self {
        let map = articles.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            articles: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn len(&self) -> usize {
        self.articles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.articles.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<Article> {
        self.articles.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Article> {
        self.articles.read().await.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ArticleStore for MemoryStore {
    async fn upsert(&self, article: Article) -> Result<UpsertOutcome, StoreError> {
        let mut map = self.articles.write().await;
        match map.insert(article.id.clone(), article) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Created),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.articles.read().await.contains_key(id))
    }

    async fn query(&self, q: &ArticleQuery) -> Result<Page<Article>, StoreError> {
        let all = self.snapshot().await;
        Ok(select_page(all, q))
    }

    async fn count_grouped_by(&self, field: GroupField) -> Result<Vec<(String, usize)>, StoreError> {
        let map = self.articles.read().await;
        Ok(group_counts(map.values(), field))
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRow>, StoreError> {
        let map = self.articles.read().await;
        Ok(activity_rows(map.values(), since))
    }
}
