// src/store/file.rs
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    activity_rows, group_counts, select_page, ActivityRow, ArticleQuery, ArticleStore, GroupField,
    Page, StoreError, UpsertOutcome,
};
use crate::model::Article;

/// JSON-file store for single-process deployments and the CLI.
/// Every upsert rewrites the snapshot via a temp file + rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    articles: Mutex<BTreeMap<String, Article>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the snapshot at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let articles = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => BTreeMap::new(),
            Ok(s) => {
                let list: Vec<Article> = serde_json::from_str(&s)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                list.into_iter().map(|a| (a.id.clone(), a)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };
        tracing::debug!(path = %path.display(), count = articles.len(), "opened article snapshot");
        Ok(Self {
            path,
            articles: Mutex::new(articles),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, articles: &BTreeMap<String, Article>) -> Result<(), StoreError> {
        let list: Vec<&Article> = articles.values().collect();
        let body = serde_json::to_vec_pretty(&list)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ArticleStore for JsonFileStore {
    async fn upsert(&self, article: Article) -> Result<UpsertOutcome, StoreError> {
        let mut map = self.articles.lock().await;
        let id = article.id.clone();
        let previous = map.insert(id.clone(), article);
        if let Err(e) = self.flush(&map).await {
            // keep memory and disk in step
            match previous {
                Some(old) => map.insert(id, old),
                None => map.remove(&id),
            };
            return Err(e);
        }
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.articles.lock().await.contains_key(id))
    }

    async fn query(&self, q: &ArticleQuery) -> Result<Page<Article>, StoreError> {
        let all: Vec<Article> = self.articles.lock().await.values().cloned().collect();
        Ok(select_page(all, q))
    }

    async fn count_grouped_by(&self, field: GroupField) -> Result<Vec<(String, usize)>, StoreError> {
        let map = self.articles.lock().await;
        Ok(group_counts(map.values(), field))
    }

    async fn activity_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRow>, StoreError> {
        let map = self.articles.lock().await;
        Ok(activity_rows(map.values(), since))
    }
}
