// src/model.rs
//! Canonical records shared by every stage of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upstream integration that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    YouTube,
    Bilibili,
    TFTimes,
    Tacter,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::YouTube,
        Platform::Bilibili,
        Platform::TFTimes,
        Platform::Tacter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::Bilibili => "Bilibili",
            Platform::TFTimes => "TFTimes",
            Platform::Tacter => "Tacter",
        }
    }

    /// Lower-case prefix used for derived article ids.
    pub fn slug(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Bilibili => "bilibili",
            Platform::TFTimes => "tftimes",
            Platform::Tacter => "tacter",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(t) || p.slug() == t)
            .or(match t {
                "B站" | "bili" => Some(Platform::Bilibili),
                "yt" => Some(Platform::YouTube),
                _ => None,
            })
            .ok_or_else(|| UnknownPlatform(t.to_string()))
    }
}

/// One persisted unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub platform: Platform,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// How a YouTube target is addressed on the feed proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Channel,
    User,
}

/// One configured account, channel, creator or category to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTarget {
    pub platform: Platform,
    /// Display name; also the author fallback when the upstream hides it.
    #[serde(alias = "name")]
    pub display_name: String,
    /// Channel id, UID, username or category path depending on the platform.
    #[serde(alias = "id", alias = "uid", alias = "username", alias = "path")]
    pub identifier: String,
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "fans")]
    pub followers: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceTarget {
    pub fn new(platform: Platform, display_name: &str, identifier: &str) -> Self {
        Self {
            platform,
            display_name: display_name.to_string(),
            identifier: identifier.to_string(),
            kind: TargetKind::default(),
            category: None,
            followers: None,
            description: None,
            enabled: true,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Key that must be unique per platform in the target directory.
    pub fn unique_key(&self) -> (Platform, String) {
        (self.platform, self.identifier.trim().to_string())
    }
}

impl fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}:{}", self.platform.slug(), self.identifier)
        } else {
            f.write_str(&self.display_name)
        }
    }
}
