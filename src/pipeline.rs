// src/pipeline.rs
//! Runs platforms side by side (each one sequential inside), gates the admin
//! trigger, and serves cached single-pass previews.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::{AccessGate, Role};
use crate::cache::FeedCache;
use crate::ingest::backoff::BackoffPolicy;
use crate::ingest::config::{DirectoryError, TargetDirectory};
use crate::ingest::providers::AdapterRegistry;
use crate::ingest::scheduler::Orchestrator;
use crate::ingest::tracker::FetchReport;
use crate::ingest::types::FetchError;
use crate::ingest::{filter_fresh, normalize_dedup, Deduplicator};
use crate::model::{Article, Platform};
use crate::persist::{PersistenceGateway, SaveStats};
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("admin role required")]
    Unauthorized,
    #[error("no adapter registered for {0}")]
    NoAdapter(Platform),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub reports: Vec<FetchReport>,
    /// Platforms with no adapter or no enabled targets.
    pub skipped: Vec<Platform>,
    /// Platforms whose target list could not be read.
    pub errors: Vec<(Platform, String)>,
}

impl RunSummary {
    /// 0 when every attempted target succeeded and nothing errored.
    pub fn exit_code(&self) -> i32 {
        let clean = self.errors.is_empty() && self.reports.iter().all(FetchReport::is_clean);
        if clean {
            0
        } else {
            1
        }
    }

    pub fn totals(&self) -> SaveStats {
        let mut t = SaveStats::default();
        for r in &self.reports {
            t.absorb(r.totals());
        }
        t
    }
}

enum PlatformOutcome {
    Ran(FetchReport),
    Skipped(Platform),
    Failed(Platform, String),
}

pub struct Pipeline {
    registry: AdapterRegistry,
    directory: Arc<dyn TargetDirectory>,
    gateway: PersistenceGateway,
    policy: BackoffPolicy,
    cache: Arc<FeedCache>,
    freshness: chrono::Duration,
}

impl Pipeline {
    pub fn new(
        registry: AdapterRegistry,
        directory: Arc<dyn TargetDirectory>,
        gateway: PersistenceGateway,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            registry,
            directory,
            gateway,
            policy,
            cache: Arc::new(FeedCache::with_system_clock(Duration::from_secs(3600))),
            freshness: chrono::Duration::days(30),
        }
    }

    pub fn with_cache(mut self, cache: Arc<FeedCache>, freshness: chrono::Duration) -> Self {
        self.cache = cache;
        self.freshness = freshness;
        self
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.registry.platforms()
    }

    /// Full run. `None` means every registered platform.
    pub async fn run(
        &self,
        platforms: Option<&[Platform]>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> RunSummary {
        let selected: Vec<Platform> = match platforms {
            Some(list) if !list.is_empty() => {
                let mut v = list.to_vec();
                v.sort();
                v.dedup();
                v
            }
            _ => self.registry.platforms(),
        };
        tracing::info!(platforms = ?selected, "pipeline run starting");

        let outcomes = join_all(
            selected
                .into_iter()
                .map(|p| self.run_platform(p, progress.clone(), cancel.clone())),
        )
        .await;

        let mut summary = RunSummary::default();
        for o in outcomes {
            match o {
                PlatformOutcome::Ran(r) => summary.reports.push(r),
                PlatformOutcome::Skipped(p) => summary.skipped.push(p),
                PlatformOutcome::Failed(p, e) => summary.errors.push((p, e)),
            }
        }
        let totals = summary.totals();
        tracing::info!(
            created = totals.created,
            updated = totals.updated,
            failed = totals.failed,
            exit_code = summary.exit_code(),
            "pipeline run finished"
        );
        summary
    }

    async fn run_platform(
        &self,
        platform: Platform,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> PlatformOutcome {
        let Some(adapter) = self.registry.get(platform) else {
            progress.emit(ProgressEvent::PlatformSkipped {
                platform,
                reason: "no adapter registered".into(),
            });
            return PlatformOutcome::Skipped(platform);
        };
        let targets = match self.directory.list_enabled_targets(platform).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(%platform, error = %e, "listing targets failed");
                return PlatformOutcome::Failed(platform, e.to_string());
            }
        };
        if targets.is_empty() {
            progress.emit(ProgressEvent::PlatformSkipped {
                platform,
                reason: "no enabled targets".into(),
            });
            return PlatformOutcome::Skipped(platform);
        }
        let report = Orchestrator::new(self.policy.clone(), self.gateway.clone())
            .with_progress(progress)
            .with_cancel(cancel)
            .run(platform, adapter.as_ref(), targets)
            .await;
        // stored data changed; previews must refetch
        self.cache.clear(Some(platform));
        PlatformOutcome::Ran(report)
    }

    /// Admin-only entry point. The role check happens before anything else.
    pub async fn trigger(
        &self,
        gate: &dyn AccessGate,
        credential: Option<&str>,
        platforms: Option<&[Platform]>,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        if gate.role_for(credential) != Some(Role::Admin) {
            tracing::warn!("fetch trigger rejected: not admin");
            return Err(PipelineError::Unauthorized);
        }
        Ok(self.run(platforms, progress, cancel).await)
    }

    /// One pass over a platform's targets without retries or persistence:
    /// dedup, drop anything outside the freshness window, newest first.
    /// Results are cached for the cache TTL.
    pub async fn preview(&self, platform: Platform) -> Result<Vec<Article>, PipelineError> {
        if let Some(hit) = self.cache.get(platform) {
            tracing::debug!(%platform, count = hit.len(), "preview cache hit");
            return Ok(hit);
        }
        let adapter = self
            .registry
            .get(platform)
            .ok_or(PipelineError::NoAdapter(platform))?;
        let targets = self.directory.list_enabled_targets(platform).await?;

        let mut dedup = Deduplicator::new();
        let mut all = Vec::new();
        let timeout = self.policy.request_timeout();
        let interval = self.policy.initial_interval();
        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.policy.jittered(interval)).await;
            }
            let res = match tokio::time::timeout(timeout, adapter.fetch(target)).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };
            match res {
                Ok(candidates) => {
                    let (kept, _, _) = normalize_dedup(Utc::now(), candidates, &mut dedup);
                    all.extend(kept);
                }
                Err(e) => tracing::warn!(%platform, target_name = %target, error = %e, "preview fetch failed"),
            }
        }
        let fresh = filter_fresh(all, Utc::now(), self.freshness);
        self.cache.set(platform, fresh.clone());
        Ok(fresh)
    }
}
