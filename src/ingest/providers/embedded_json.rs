// src/ingest/providers/embedded_json.rs
//! Guide listings on tacter.com. The profile page ships its query cache as a
//! JSON string inside the `__NEXT_DATA__` script; we parse it twice and walk
//! `queries[].state.data.pages[]`.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{absolute_url, MAX_ITEMS_PER_TARGET};
use crate::ingest::http::HttpFetch;
use crate::ingest::types::{Candidate, FetchError, SourceAdapter};
use crate::model::{Platform, SourceTarget};

pub const TACTER_ORIGIN: &str = "https://www.tacter.com";
const DEFAULT_CATEGORY: &str = "Guide";

static RE_NEXT_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<script[^>]*id="__NEXT_DATA__"[^>]*>(.*?)</script>"#).unwrap()
});
static RE_BARE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""title":"([^"]+)""#).unwrap());

pub struct EmbeddedJsonAdapter {
    http: Arc<dyn HttpFetch>,
    origin: String,
}

impl EmbeddedJsonAdapter {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self::with_origin(http, TACTER_ORIGIN)
    }

    pub fn with_origin(http: Arc<dyn HttpFetch>, origin: &str) -> Self {
        Self {
            http,
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn profile_url(&self, target: &SourceTarget) -> String {
        format!("{}/@{}", self.origin, username(target))
    }

    /// Candidates from a profile page. A page without the marker yields nothing;
    /// a payload that cannot be walked drops to the title scan.
    pub fn parse(&self, html: &str, target: &SourceTarget) -> Vec<Candidate> {
        let t0 = Instant::now();
        let Some(payload) = RE_NEXT_DATA
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            tracing::debug!(source = %target, "no __NEXT_DATA__ marker");
            return Vec::new();
        };

        let candidates = match guide_objects(payload) {
            Ok(guides) => guides
                .iter()
                .map(|g| self.guide_candidate(g, target))
                .collect(),
            Err(e) => {
                tracing::warn!(source = %target, error = %e, "guide payload unreadable, using title scan");
                degraded_candidates(html, target)
            }
        };

        let mut seen = HashSet::new();
        let out: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.title.clone()))
            .take(MAX_ITEMS_PER_TARGET)
            .collect();
        histogram!("ingest_parse_ms", "platform" => Platform::Tacter.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    fn guide_candidate(&self, guide: &Value, target: &SourceTarget) -> Candidate {
        let id = guide_id(guide).unwrap_or_default();
        let title = non_empty_str(guide, "title")
            .or_else(|| non_empty_str(guide, "displayName"))
            .unwrap_or("Untitled");
        let link = non_empty_str(guide, "slug")
            .map(|slug| format!("{}/tft/guides/{slug}", self.origin))
            .unwrap_or_default();

        let mut c = Candidate::new(Platform::Tacter, title, &link, &target.display_name);
        c.id = Some(format!("tacter-{id}"));
        c.description = champion_summary(guide)
            .or_else(|| target.description.clone())
            .unwrap_or_default();
        c.thumbnail = non_empty_str(guide, "authorProfilePicture")
            .map(|p| absolute_url(&self.origin, p));
        c.published_at = guide
            .get("createdAt")
            .and_then(json_date)
            .or_else(|| guide.get("updatedAt").and_then(json_date));
        c.category = Some(
            target
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        );
        c
    }
}

fn username(target: &SourceTarget) -> &str {
    target.identifier.trim().trim_start_matches('@')
}

fn non_empty_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn guide_id(guide: &Value) -> Option<String> {
    match guide.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Outer parse, inner parse of `dehydratedState`, then every guide object with an id.
pub fn guide_objects(payload: &str) -> Result<Vec<Value>, FetchError> {
    let next: Value = serde_json::from_str(payload.trim())
        .map_err(|e| FetchError::Parse(format!("__NEXT_DATA__: {e}")))?;
    let dehydrated = next
        .pointer("/props/pageProps/dehydratedState")
        .ok_or_else(|| FetchError::Parse("missing props.pageProps.dehydratedState".into()))?;
    let state: Value = match dehydrated {
        Value::String(inner) => serde_json::from_str(inner)
            .map_err(|e| FetchError::Parse(format!("dehydratedState: {e}")))?,
        Value::Object(_) => dehydrated.clone(),
        _ => return Err(FetchError::Parse("dehydratedState is not an object".into())),
    };

    let mut guides = Vec::new();
    let queries = state
        .get("queries")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for query in queries {
        let Some(pages) = query.pointer("/state/data/pages").and_then(Value::as_array) else {
            continue;
        };
        for page in pages {
            let items: Vec<&Value> = match page {
                Value::Array(a) => a.iter().collect(),
                Value::Object(o) => o.values().collect(),
                _ => continue,
            };
            guides.extend(
                items
                    .into_iter()
                    .filter(|g| g.is_object() && guide_id(g).is_some())
                    .cloned(),
            );
        }
    }
    Ok(guides)
}

/// "Champions: A, B, C" from up to five named entries in `header.content.champions`.
fn champion_summary(guide: &Value) -> Option<String> {
    let champions = guide.pointer("/header/content/champions")?;
    let list: Vec<&Value> = match champions {
        Value::Object(o) => o.values().collect(),
        Value::Array(a) => a.iter().collect(),
        _ => return None,
    };
    let names: Vec<&str> = list
        .into_iter()
        .filter_map(|c| non_empty_str(c, "name"))
        .take(5)
        .collect();
    (!names.is_empty()).then(|| format!("Champions: {}", names.join(", ")))
}

fn json_date(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Bare `"title":"..."` matches, up to the cap. These records have no link and no
/// thumbnail; their ids come from `(username, index)`.
fn degraded_candidates(html: &str, target: &SourceTarget) -> Vec<Candidate> {
    let user = username(target);
    RE_BARE_TITLE
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .take(MAX_ITEMS_PER_TARGET)
        .enumerate()
        .map(|(i, title)| {
            let mut c = Candidate::new(Platform::Tacter, &title, "", &target.display_name);
            c.id = Some(format!("tacter-{user}-{i}"));
            c.description = target.description.clone().unwrap_or_default();
            c.category = Some(
                target
                    .category
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            );
            c
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for EmbeddedJsonAdapter {
    async fn fetch(&self, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError> {
        let url = self.profile_url(target);
        let headers = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language", "en-US,en;q=0.9".to_string()),
        ];
        let resp = self.http.get(&url, &headers).await?;
        match resp.status {
            200 => Ok(self.parse(&resp.body, target)),
            429 => Err(FetchError::RateLimited(format!("HTTP 429 from {url}"))),
            status => Err(FetchError::Status { status }),
        }
    }

    fn name(&self) -> &'static str {
        "tacter-embedded-json"
    }
}
