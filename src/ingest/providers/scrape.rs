// src/ingest/providers/scrape.rs
//! Category listing pages on tftimes.jp, read with pattern matching over raw HTML.
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{capture, MAX_ITEMS_PER_TARGET};
use crate::ingest::clean_text;
use crate::ingest::http::HttpFetch;
use crate::ingest::types::{Candidate, FetchError, SourceAdapter};
use crate::model::{Platform, SourceTarget};

pub const TFTIMES_ORIGIN: &str = "https://www.tftimes.jp";
const DEFAULT_AUTHOR: &str = "TFTimes";

static RE_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<article[^>]*class="[^"]*entry-card[^"]*"[^>]*>.*?</article>"#).unwrap()
});
static RE_H2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<h2([^>]*)>(.*?)</h2>").unwrap());
static RE_POST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"id="post-(\d+)""#).unwrap());
static RE_SNIPPET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<div[^>]*class="[^"]*entry-card-snippet[^"]*"[^>]*>(.*?)</div>"#).unwrap()
});
static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span[^>]*class="[^"]*entry-date[^"]*"[^>]*>(.*?)</span>"#).unwrap()
});
static RE_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\.(\d{1,2})\.(\d{1,2})").unwrap());
/// Theme variants seen for the category label, tried in order.
static RE_CATEGORY: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r#"(?s)<span[^>]*class="[^"]*cat-name[^"]*"[^>]*>(.*?)</span>"#).unwrap(),
        Regex::new(r#"(?s)<a[^>]*class="[^"]*cat-link[^"]*"[^>]*>(.*?)</a>"#).unwrap(),
        Regex::new(r#"(?s)<span[^>]*class="[^"]*category[^"]*"[^>]*>(.*?)</span>"#).unwrap(),
    ]
});

pub struct ScrapeAdapter {
    http: Arc<dyn HttpFetch>,
    origin: String,
}

impl ScrapeAdapter {
    pub fn new(http: Arc<dyn HttpFetch>) -> Self {
        Self::with_origin(http, TFTIMES_ORIGIN)
    }

    pub fn with_origin(http: Arc<dyn HttpFetch>, origin: &str) -> Self {
        Self {
            http,
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn category_url(&self, target: &SourceTarget) -> String {
        let path = target.identifier.trim();
        if path.starts_with('/') {
            format!("{}{}", self.origin, path)
        } else {
            format!("{}/{}", self.origin, path)
        }
    }

    /// First five well-formed cards in page order.
    pub fn parse(&self, html: &str, target: &SourceTarget) -> Vec<Candidate> {
        let t0 = Instant::now();
        let author = if target.display_name.trim().is_empty() {
            DEFAULT_AUTHOR
        } else {
            target.display_name.trim()
        };
        let mut out = Vec::with_capacity(MAX_ITEMS_PER_TARGET);
        for (i, card) in RE_CARD.find_iter(html).enumerate() {
            if out.len() >= MAX_ITEMS_PER_TARGET {
                break;
            }
            match self.parse_card(card.as_str(), author, target) {
                Some(c) => out.push(c),
                None => tracing::debug!(index = i, "skipping entry card without title or post id"),
            }
        }
        histogram!("ingest_parse_ms", "platform" => Platform::TFTimes.as_str())
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    fn parse_card(&self, card: &str, author: &str, target: &SourceTarget) -> Option<Candidate> {
        let title = card_title(card)?;
        // no post id, no canonical link
        let post_id = capture(&RE_POST_ID, card)?;
        let link = format!("{}/?p={}", self.origin, post_id);

        let mut c = Candidate::new(Platform::TFTimes, &title, &link, author);
        c.id = Some(format!("tftimes-{post_id}"));
        c.description = capture(&RE_SNIPPET, card).unwrap_or_default();
        c.published_at = capture(&RE_DATE, card).and_then(|d| parse_dotted_date(&d));
        c.category = card_category(card).or_else(|| target.category.clone());
        Some(c)
    }
}

/// `<h2>` carrying both the `entry-card-title` class and `itemprop="headline"`.
fn card_title(card: &str) -> Option<String> {
    RE_H2.captures_iter(card).find_map(|c| {
        let attrs = c.get(1)?.as_str();
        if !(attrs.contains("entry-card-title") && attrs.contains(r#"itemprop="headline""#)) {
            return None;
        }
        let t = clean_text(c.get(2)?.as_str());
        (!t.is_empty()).then_some(t)
    })
}

fn card_category(card: &str) -> Option<String> {
    RE_CATEGORY
        .iter()
        .filter_map(|re| capture(re, card))
        .map(|s| clean_text(&s))
        .find(|s| !s.is_empty())
}

/// `YYYY.MM.DD` as midnight UTC.
pub fn parse_dotted_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = clean_text(raw);
    let caps = RE_YMD.captures(&cleaned)?;
    let y = caps.get(1)?.as_str().parse().ok()?;
    let m = caps.get(2)?.as_str().parse().ok()?;
    let d = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl SourceAdapter for ScrapeAdapter {
    async fn fetch(&self, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError> {
        let url = self.category_url(target);
        let headers = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            ("Accept-Language", "ja,en-US;q=0.7,en;q=0.3".to_string()),
        ];
        let resp = self.http.get(&url, &headers).await?;
        match resp.status {
            200 => Ok(self.parse(&resp.body, target)),
            429 => Err(FetchError::RateLimited(format!("HTTP 429 from {url}"))),
            status => Err(FetchError::Status { status }),
        }
    }

    fn name(&self) -> &'static str {
        "tftimes-scrape"
    }
}
