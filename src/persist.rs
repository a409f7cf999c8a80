// src/persist.rs
//! Batch upsert with per-item failure accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::model::Article;
use crate::store::{ArticleStore, UpsertOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl SaveStats {
    pub fn saved(&self) -> usize {
        self.created + self.updated
    }

    pub fn absorb(&mut self, other: SaveStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn ArticleStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn ArticleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    /// Upsert each article, stamping `fetched_at`. A failing item is logged
    /// and counted; the rest of the batch still goes through.
    pub async fn persist_batch(&self, articles: Vec<Article>, fetched_at: DateTime<Utc>) -> SaveStats {
        let mut stats = SaveStats::default();
        for mut article in articles {
            article.fetched_at = fetched_at;
            let id = article.id.clone();
            let platform = article.platform.as_str();
            match self.store.upsert(article).await {
                Ok(UpsertOutcome::Created) => {
                    stats.created += 1;
                    counter!("articles_created_total", "platform" => platform).increment(1);
                }
                Ok(UpsertOutcome::Updated) => {
                    stats.updated += 1;
                    counter!("articles_updated_total", "platform" => platform).increment(1);
                }
                Err(e) => {
                    stats.failed += 1;
                    counter!("persist_failures_total", "platform" => platform).increment(1);
                    tracing::warn!(%id, error = %e, "upsert failed");
                }
            }
        }
        stats
    }
}
