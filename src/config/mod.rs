// src/config/mod.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::ingest::backoff::BackoffPolicy;
use crate::ingest::providers::{embedded_json::TACTER_ORIGIN, scrape::TFTIMES_ORIGIN};

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backoff: BackoffPolicy,
    pub feeds: FeedsConfig,
    pub scrape: OriginConfig,
    pub guides: OriginConfig,
    pub store: StoreConfig,
    pub targets: TargetsConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    /// Proxy base URLs, tried in order.
    pub instances: Vec<String>,
    pub bilibili_cookie: Option<String>,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            instances: vec!["http://localhost:1200".to_string()],
            bilibili_cookie: None,
        }
    }
}

/// Origin override for the scrape/guide adapters; empty means the built-in site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: PathBuf::from("data/articles.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    /// Explicit targets file; otherwise `$AGGREGATOR_TARGETS` and `config/targets.*`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Preview drops anything published longer ago than this.
    pub freshness_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            freshness_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub admin_api_key: Option<String>,
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            admin_api_key: None,
            metrics: true,
        }
    }
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config in {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// $AGGREGATOR_CONFIG (must exist) → config/aggregator.toml → defaults,
    /// then env overrides.
    pub fn load_default() -> Result<Self> {
        let cfg = if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            Self::default()
        };
        Ok(cfg.with_env_overrides())
    }

    /// `BILIBILI_COOKIE`, `ADMIN_API_KEY`, `RSSHUB_INSTANCES` (comma-separated).
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(c) = non_empty_env("BILIBILI_COOKIE") {
            self.feeds.bilibili_cookie = Some(c);
        }
        if let Some(k) = non_empty_env("ADMIN_API_KEY") {
            self.server.admin_api_key = Some(k);
        }
        if let Some(list) = non_empty_env("RSSHUB_INSTANCES") {
            let instances: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !instances.is_empty() {
                self.feeds.instances = instances;
            }
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        self.feeds.instances.retain(|s| !s.trim().is_empty());
        if self.backoff.max_attempts == 0 {
            self.backoff.max_attempts = 1;
        }
        if self.backoff.max_rounds == 0 {
            self.backoff.max_rounds = 1;
        }
        if self.backoff.max_interval_ms < self.backoff.initial_interval_ms {
            self.backoff.max_interval_ms = self.backoff.initial_interval_ms;
        }
        // jitter wider than the longest wait would swamp the schedule
        self.backoff.jitter_ms = self.backoff.jitter_ms.min(self.backoff.max_interval_ms);
        self.backoff.request_timeout_ms = self.backoff.request_timeout_ms.max(MIN_REQUEST_TIMEOUT_MS);
        if self.cache.freshness_days <= 0 {
            self.cache.freshness_days = CacheConfig::default().freshness_days;
        }
        self
    }

    pub fn scrape_origin(&self) -> &str {
        self.scrape.origin.as_deref().unwrap_or(TFTIMES_ORIGIN)
    }

    pub fn guides_origin(&self) -> &str {
        self.guides.origin.as_deref().unwrap_or(TACTER_ORIGIN)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
