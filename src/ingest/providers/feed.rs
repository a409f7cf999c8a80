// src/ingest/providers/feed.rs
//! RSS 2.0 / Atom through one or more feed-proxy instances.
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use regex::Regex;

use super::{absolute_url, capture, parse_feed_date, MAX_ITEMS_PER_TARGET};
use crate::ingest::http::HttpFetch;
use crate::ingest::types::{Candidate, FetchError, SourceAdapter};
use crate::model::{Platform, SourceTarget, TargetKind};

static RE_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<item(?:\s[^>]*)?>(.*?)</item>").unwrap());
static RE_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<entry(?:\s[^>]*)?>(.*?)</entry>").unwrap());

static RE_TITLE_CDATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<title[^>]*>\s*<!\[CDATA\[(.*?)\]\]>\s*</title>").unwrap());
static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<title[^>]*>(.*?)</title>").unwrap());
static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<link>(.*?)</link>").unwrap());
static RE_LINK_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<link[^>]*href=["']([^"']+)["']"#).unwrap());
static RE_DESC_CDATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(description|summary|content|media:description)[^>]*>\s*<!\[CDATA\[(.*?)\]\]>\s*</(?:description|summary|content|media:description)>").unwrap()
});
static RE_DESC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(description|summary|content|media:description)(?:\s[^>]*)?>(.*?)</(?:description|summary|content|media:description)>").unwrap()
});
static RE_PUB_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<pubDate>(.*?)</pubDate>").unwrap());
static RE_PUBLISHED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<published>(.*?)</published>").unwrap());
static RE_UPDATED: Lazy<Regex> = Lazy::new(|| Regex::new(r"<updated>(.*?)</updated>").unwrap());
static RE_GUID: Lazy<Regex> = Lazy::new(|| Regex::new(r"<guid[^>]*>(.*?)</guid>").unwrap());

static RE_BV: Lazy<Regex> = Lazy::new(|| Regex::new(r"/video/(BV[a-zA-Z0-9]+)").unwrap());
static RE_YT_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<yt:videoId>(.*?)</yt:videoId>").unwrap());
static RE_WATCH_V: Lazy<Regex> = Lazy::new(|| Regex::new(r"watch\?v=([a-zA-Z0-9_-]+)").unwrap());

static RE_ENCLOSURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<enclosure[^>]*url=["']([^"']+)["']"#).unwrap());
static RE_MEDIA_THUMB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<media:thumbnail[^>]*url=["']([^"']+)["']"#).unwrap());
static RE_MEDIA_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<media:content[^>]*url=["']([^"']+)["'][^>]*type=["']image"#).unwrap()
});
static RE_ITUNES_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<itunes:image[^>]*href=["']([^"']+)["']"#).unwrap());
static RE_IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<img[^>]*src=["']([^"']+)["']"#).unwrap());
static RE_BG_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"style=["'][^"']*background-image:\s*url\(["']?([^"')]+)["']?\)"#).unwrap()
});

/// "NAME 的 bilibili 空间" and similar feed titles.
static RE_SPACE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s*的\s*\S+?\s*空间$").unwrap());

/// Messages the Bilibili proxy route returns when the upstream risk check trips.
const RISK_CONTROL_MARKERS: [&str; 2] = ["-352", "风控校验失败"];

pub struct FeedAdapter {
    http: Arc<dyn HttpFetch>,
    platform: Platform,
    instances: Vec<String>,
    cookie: Option<String>,
}

impl FeedAdapter {
    pub fn new(http: Arc<dyn HttpFetch>, platform: Platform, instances: Vec<String>) -> Self {
        Self {
            http,
            platform,
            instances,
            cookie: None,
        }
    }

    /// Sent as `Cookie` on every request (Bilibili routes behave better with one).
    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie.filter(|c| !c.trim().is_empty());
        self
    }

    /// Proxy route path for a target. Identifiers that already look like a
    /// route (leading `/`) are used as is.
    pub fn route_for(&self, target: &SourceTarget) -> String {
        let id = target.identifier.trim();
        if id.starts_with('/') {
            return id.to_string();
        }
        match (self.platform, target.kind) {
            (Platform::Bilibili, _) => format!("/bilibili/user/video/{id}"),
            (Platform::YouTube, TargetKind::User) => format!("/youtube/user/{id}"),
            (Platform::YouTube, TargetKind::Channel) => format!("/youtube/channel/{id}"),
            (other, _) => format!("/{}/{id}", other.slug()),
        }
    }

    async fn fetch_instance(&self, url: &str) -> Result<String, FetchError> {
        let mut headers = vec![(
            "Accept",
            "application/rss+xml, application/atom+xml, application/xml, text/xml;q=0.9, */*;q=0.8"
                .to_string(),
        )];
        if let Some(c) = &self.cookie {
            headers.push(("Cookie", c.clone()));
        }
        let resp = self.http.get(url, &headers).await?;
        match resp.status {
            200 => {}
            429 => return Err(FetchError::RateLimited(format!("HTTP 429 from {url}"))),
            503 if RISK_CONTROL_MARKERS.iter().any(|m| resp.body.contains(m)) => {
                return Err(FetchError::RateLimited(format!("risk control (503) from {url}")))
            }
            status => return Err(FetchError::Status { status }),
        }
        let ct = resp.content_type.unwrap_or_default().to_ascii_lowercase();
        let looks_like_feed = resp.body.contains("<rss") || resp.body.contains("<feed");
        if !(ct.contains("xml") || ct.contains("rss") || looks_like_feed) {
            return Err(FetchError::ContentType(if ct.is_empty() {
                "missing content-type".to_string()
            } else {
                ct
            }));
        }
        Ok(resp.body)
    }

    /// Parse a feed body into at most five candidates, in document order.
    pub fn parse(&self, xml: &str, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError> {
        let t0 = Instant::now();
        let (blocks, atom): (Vec<&str>, bool) = {
            let items: Vec<&str> = RE_ITEM
                .captures_iter(xml)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if !items.is_empty() {
                (items, false)
            } else {
                let entries = RE_ENTRY
                    .captures_iter(xml)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect();
                (entries, true)
            }
        };
        if blocks.is_empty() && !(xml.contains("<rss") || xml.contains("<feed") || xml.contains("<channel")) {
            return Err(FetchError::Parse("neither <item> nor <entry> found".into()));
        }

        let author = resolve_author(xml, &target.display_name);
        let mut out = Vec::with_capacity(MAX_ITEMS_PER_TARGET);
        for (i, block) in blocks.iter().enumerate() {
            if out.len() >= MAX_ITEMS_PER_TARGET {
                break;
            }
            match self.parse_block(block, atom, &author, target) {
                Some(c) => out.push(c),
                None => tracing::debug!(platform = %self.platform, index = i, "skipping unparseable feed item"),
            }
        }
        histogram!("ingest_parse_ms", "platform" => self.platform.as_str()).record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn parse_block(
        &self,
        block: &str,
        atom: bool,
        author: &str,
        target: &SourceTarget,
    ) -> Option<Candidate> {
        let title = capture(&RE_TITLE_CDATA, block).or_else(|| capture(&RE_TITLE, block))?;
        let link = if atom {
            capture(&RE_LINK_HREF, block).or_else(|| capture(&RE_LINK, block))
        } else {
            capture(&RE_LINK, block).or_else(|| capture(&RE_LINK_HREF, block))
        }
        .map(|l| decode(&l))?;

        let raw_description = RE_DESC_CDATA
            .captures(block)
            .or_else(|| RE_DESC.captures(block))
            .and_then(|c| c.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let published_at = capture(&RE_PUB_DATE, block)
            .or_else(|| capture(&RE_PUBLISHED, block))
            .or_else(|| capture(&RE_UPDATED, block))
            .and_then(|d| parse_feed_date(&d));

        let mut c = Candidate::new(self.platform, &title, &link, author);
        c.id = self.upstream_id(block, &link);
        c.thumbnail = extract_thumbnail(block, &raw_description).map(|u| resolve_against(&link, u));
        c.description = raw_description;
        c.category = target.category.clone();
        c.published_at = published_at;
        Some(c)
    }

    fn upstream_id(&self, block: &str, link: &str) -> Option<String> {
        match self.platform {
            Platform::Bilibili => capture(&RE_BV, link).map(|bv| format!("bilibili-{bv}")),
            Platform::YouTube => capture(&RE_YT_VIDEO_ID, block)
                .or_else(|| capture(&RE_GUID, block).and_then(|g| capture(&RE_WATCH_V, &g)))
                .or_else(|| capture(&RE_WATCH_V, link))
                .map(|v| format!("youtube-{v}")),
            _ => None,
        }
    }
}

fn decode(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

/// First match wins: enclosure, media:thumbnail, media:content (image),
/// itunes:image, then an `<img>` or CSS background inside the decoded description.
pub fn extract_thumbnail(block: &str, raw_description: &str) -> Option<String> {
    for re in [&*RE_ENCLOSURE, &*RE_MEDIA_THUMB, &*RE_MEDIA_CONTENT, &*RE_ITUNES_IMAGE] {
        if let Some(url) = capture(re, block) {
            return Some(decode(&url));
        }
    }
    if raw_description.is_empty() {
        return None;
    }
    let decoded = decode(raw_description);
    capture(&RE_IMG_SRC, &decoded)
        .or_else(|| capture(&RE_BG_IMAGE, &decoded))
        .map(|u| decode(&u))
}

/// `scheme://host` of an absolute link.
fn link_origin(link: &str) -> Option<&str> {
    let start = link.find("://")? + 3;
    let end = link[start..].find('/').map_or(link.len(), |i| start + i);
    Some(&link[..end])
}

/// Host-relative and protocol-relative thumbnails (`/x.jpg`, `//cdn/x.jpg`)
/// are made absolute; anything else is kept as found.
fn resolve_against(link: &str, url: String) -> String {
    if !url.starts_with('/') {
        return url;
    }
    match link_origin(link) {
        Some(origin) => absolute_url(origin, &url),
        None if url.starts_with("//") => absolute_url("", &url),
        None => url,
    }
}

/// Feed-level `<title>` (the one before the first item/entry).
pub fn feed_title(xml: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_title = false;
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => return None,
                b"title" => in_title = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_title => match t.unescape() {
                Ok(s) => text.push_str(&s),
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Ok(Event::CData(c)) if in_title => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()))
            }
            Ok(Event::End(e)) if in_title && e.local_name().as_ref() == b"title" => {
                let t = text.trim();
                return (!t.is_empty()).then(|| t.to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Recover the creator name from a "NAME 的 X 空间" feed title, else use `fallback`.
pub fn resolve_author(xml: &str, fallback: &str) -> String {
    feed_title(xml)
        .and_then(|t| capture(&RE_SPACE_TITLE, &t))
        .unwrap_or_else(|| fallback.to_string())
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    async fn fetch(&self, target: &SourceTarget) -> Result<Vec<Candidate>, FetchError> {
        let route = self.route_for(target);
        let mut last: Option<FetchError> = None;
        for base in &self.instances {
            let url = format!("{}{}", base.trim_end_matches('/'), route);
            match self.fetch_instance(&url).await {
                Ok(body) => return self.parse(&body, target),
                Err(e) => {
                    tracing::warn!(platform = %self.platform, %url, error = %e, "feed instance failed");
                    last = Some(e);
                }
            }
        }
        Err(FetchError::AllInstancesExhausted {
            attempted: self.instances.len(),
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no feed instances configured".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        match self.platform {
            Platform::Bilibili => "bilibili-feed",
            Platform::YouTube => "youtube-feed",
            _ => "feed",
        }
    }
}
