// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod stats;
pub mod store;

pub use crate::api::router;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::FeedCache;
use crate::config::{AppConfig, StoreBackend};
use crate::ingest::config::{load_targets_default, load_targets_from, InMemoryTargetDirectory, TargetDirectory};
use crate::ingest::http::HttpFetch;
use crate::ingest::providers::{
    embedded_json::EmbeddedJsonAdapter, feed::FeedAdapter, scrape::ScrapeAdapter, AdapterRegistry,
};
use crate::model::Platform;
use crate::persist::PersistenceGateway;
use crate::pipeline::Pipeline;
use crate::store::{file::JsonFileStore, memory::MemoryStore, ArticleStore};

/// One adapter per platform, all sharing `http`.
pub fn build_registry(cfg: &AppConfig, http: Arc<dyn HttpFetch>) -> AdapterRegistry {
    let instances = cfg.feeds.instances.clone();
    AdapterRegistry::new()
        .with(
            Platform::YouTube,
            Arc::new(FeedAdapter::new(http.clone(), Platform::YouTube, instances.clone())),
        )
        .with(
            Platform::Bilibili,
            Arc::new(
                FeedAdapter::new(http.clone(), Platform::Bilibili, instances)
                    .with_cookie(cfg.feeds.bilibili_cookie.clone()),
            ),
        )
        .with(
            Platform::TFTimes,
            Arc::new(ScrapeAdapter::with_origin(http.clone(), cfg.scrape_origin())),
        )
        .with(
            Platform::Tacter,
            Arc::new(EmbeddedJsonAdapter::with_origin(http, cfg.guides_origin())),
        )
}

pub async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn ArticleStore>> {
    Ok(match cfg.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(
            JsonFileStore::open(&cfg.store.path)
                .await
                .with_context(|| format!("opening store at {}", cfg.store.path.display()))?,
        ),
    })
}

/// Explicit path, then the default lookup; an empty directory when nothing is configured.
pub fn build_directory(cfg: &AppConfig) -> Result<Arc<dyn TargetDirectory>> {
    if let Some(p) = &cfg.targets.path {
        return Ok(Arc::new(load_targets_from(p)?));
    }
    match load_targets_default()? {
        Some(dir) => {
            tracing::info!(path = %dir.path().display(), targets = dir.targets().len(), "targets loaded");
            Ok(Arc::new(dir))
        }
        None => {
            tracing::warn!("no targets configured; every platform will be skipped");
            Ok(Arc::new(InMemoryTargetDirectory::new()))
        }
    }
}

pub fn build_pipeline(
    cfg: &AppConfig,
    registry: AdapterRegistry,
    directory: Arc<dyn TargetDirectory>,
    store: Arc<dyn ArticleStore>,
) -> Pipeline {
    let cache = Arc::new(FeedCache::with_system_clock(Duration::from_secs(cfg.cache.ttl_secs)));
    Pipeline::new(registry, directory, PersistenceGateway::new(store), cfg.backoff.clone())
        .with_cache(cache, chrono::Duration::days(cfg.cache.freshness_days))
}
