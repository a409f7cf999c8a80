// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::model::{Platform, SourceTarget};

const ENV_PATH: &str = "AGGREGATOR_TARGETS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("duplicate target {platform}:{identifier}")]
    Duplicate {
        platform: Platform,
        identifier: String,
    },
    #[error("target directory unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the configured accounts/channels/categories.
#[async_trait::async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Enabled targets for `platform`, in configured order.
    async fn list_enabled_targets(&self, platform: Platform) -> Result<Vec<SourceTarget>, DirectoryError>;
}

/// Process-local directory. Registration rejects a second target with the
/// same `(platform, identifier)`.
#[derive(Debug, Default)]
pub struct InMemoryTargetDirectory {
    targets: RwLock<Vec<SourceTarget>>,
}

impl InMemoryTargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_targets(targets: Vec<SourceTarget>) -> Result<Self, DirectoryError> {
        let dir = Self::new();
        for t in targets {
            dir.register(t)?;
        }
        Ok(dir)
    }

    pub fn register(&self, target: SourceTarget) -> Result<(), DirectoryError> {
        let mut guard = self
            .targets
            .write()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".into()))?;
        let key = target.unique_key();
        if guard.iter().any(|t| t.unique_key() == key) {
            return Err(DirectoryError::Duplicate {
                platform: key.0,
                identifier: key.1,
            });
        }
        guard.push(target);
        Ok(())
    }

    pub fn all(&self) -> Vec<SourceTarget> {
        self.targets.read().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TargetDirectory for InMemoryTargetDirectory {
    async fn list_enabled_targets(&self, platform: Platform) -> Result<Vec<SourceTarget>, DirectoryError> {
        let guard = self
            .targets
            .read()
            .map_err(|_| DirectoryError::Unavailable("lock poisoned".into()))?;
        Ok(guard
            .iter()
            .filter(|t| t.platform == platform && t.enabled)
            .cloned()
            .collect())
    }
}

/// Directory backed by a TOML (`[[targets]]`) or JSON (array) file.
#[derive(Debug)]
pub struct FileTargetDirectory {
    path: PathBuf,
    inner: InMemoryTargetDirectory,
}

impl FileTargetDirectory {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn targets(&self) -> Vec<SourceTarget> {
        self.inner.all()
    }
}

#[async_trait::async_trait]
impl TargetDirectory for FileTargetDirectory {
    async fn list_enabled_targets(&self, platform: Platform) -> Result<Vec<SourceTarget>, DirectoryError> {
        self.inner.list_enabled_targets(platform).await
    }
}

/// Load targets from an explicit path. Supports TOML or JSON formats.
pub fn load_targets_from(path: &Path) -> Result<FileTargetDirectory> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading targets from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let list = parse_targets(&content, ext.as_str())
        .with_context(|| format!("parsing targets in {}", path.display()))?;
    let inner = InMemoryTargetDirectory::from_targets(list)
        .with_context(|| format!("registering targets from {}", path.display()))?;
    Ok(FileTargetDirectory {
        path: path.to_path_buf(),
        inner,
    })
}

/// Load targets using env var + fallbacks:
/// 1) $AGGREGATOR_TARGETS
/// 2) config/targets.toml
/// 3) config/targets.json
///
/// `Ok(None)` when nothing is configured.
pub fn load_targets_default() -> Result<Option<FileTargetDirectory>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_targets_from(&pb).map(Some);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    for candidate in ["config/targets.toml", "config/targets.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_targets_from(&p).map(Some);
        }
    }
    Ok(None)
}

fn parse_targets(s: &str, hint_ext: &str) -> Result<Vec<SourceTarget>> {
    let try_toml = hint_ext == "toml" || s.contains("[[targets]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    // surface the error of the most likely format
    if try_toml {
        parse_toml(s)
    } else {
        parse_json(s)
    }
}

fn parse_toml(s: &str) -> Result<Vec<SourceTarget>> {
    #[derive(serde::Deserialize)]
    struct TomlTargets {
        #[serde(default)]
        targets: Vec<SourceTarget>,
    }
    let v: TomlTargets = toml::from_str(s)?;
    Ok(clean_list(v.targets))
}

fn parse_json(s: &str) -> Result<Vec<SourceTarget>> {
    let v: Vec<SourceTarget> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

/// Trim identifiers and names; drop entries without an identifier.
fn clean_list(items: Vec<SourceTarget>) -> Vec<SourceTarget> {
    items
        .into_iter()
        .filter_map(|mut t| {
            t.identifier = t.identifier.trim().to_string();
            t.display_name = t.display_name.trim().to_string();
            (!t.identifier.is_empty()).then_some(t)
        })
        .collect()
}
