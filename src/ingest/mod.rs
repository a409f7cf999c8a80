// src/ingest/mod.rs
pub mod backoff;
pub mod config;
pub mod http;
pub mod providers;
pub mod scheduler;
pub mod tracker;
pub mod types;

use crate::ingest::types::Candidate;
use crate::model::Article;
use chrono::{DateTime, Duration, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use std::collections::HashSet;

/// Substitute for descriptions that are empty, too short, or markup debris.
pub const NO_DESCRIPTION: &str = "No description available";
/// Character cap for descriptions, not counting [`ELLIPSIS`].
pub const DESCRIPTION_LIMIT: usize = 200;
pub const ELLIPSIS: &str = "...";

/// Fragments that survive tag stripping when an upstream truncated an embed mid-tag.
const MARKUP_REMNANTS: [&str; 7] = [
    "iframe",
    "frameborder",
    "allowfullscreen",
    "div>",
    "script>",
    "class=\"",
    "src=\"",
];

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_attempts_total", "Target fetch attempts.");
        describe_counter!("fetch_failures_total", "Target fetch attempts that failed.");
        describe_counter!(
            "fetch_rate_limited_total",
            "Failures caused by an upstream anti-bot rejection."
        );
        describe_counter!("articles_created_total", "Articles inserted by upsert.");
        describe_counter!("articles_updated_total", "Articles overwritten by upsert.");
        describe_counter!("persist_failures_total", "Per-item upsert failures.");
        describe_counter!(
            "ingest_dedup_total",
            "Candidates dropped because their id was already seen in the run."
        );
        describe_histogram!("ingest_parse_ms", "Adapter parse time in milliseconds.");
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix ts when a platform run last finished."
        );
    });
}

fn re_tags() -> &'static regex::Regex {
    // A tag starts with a name, `/`, `!` or `?`; a bare `<` is text.
    // `(?:>|$)` also eats a tag cut off at the end of the input.
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    RE_TAGS.get_or_init(|| regex::Regex::new(r"(?s)<[A-Za-z/!?][^>]*(?:>|$)").unwrap())
}

fn re_ws() -> &'static regex::Regex {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap())
}

/// Decode entities, then strip tags, until neither changes the text.
/// Decoding first means `&lt;b&gt;` is removed as a tag too.
/// Every pass that changes something makes the text shorter, so this ends.
fn strip_markup(s: &str) -> String {
    let mut cur = s.to_string();
    loop {
        let decoded = html_escape::decode_html_entities(&cur);
        let stripped = re_tags().replace_all(&decoded, "").into_owned();
        if stripped == cur {
            return cur;
        }
        cur = stripped;
    }
}

/// Plain text: entities decoded, tags stripped, whitespace collapsed and trimmed.
pub fn clean_text(s: &str) -> String {
    let stripped = strip_markup(s);
    re_ws().replace_all(&stripped, " ").trim().to_string()
}

fn has_markup_remnants(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    MARKUP_REMNANTS.iter().any(|m| lower.contains(m))
}

/// Cap at [`DESCRIPTION_LIMIT`] chars plus [`ELLIPSIS`]. Text that already has
/// exactly that shape is left alone so sanitizing twice changes nothing.
pub fn truncate_description(s: &str) -> String {
    let n = s.chars().count();
    if n <= DESCRIPTION_LIMIT {
        return s.to_string();
    }
    if n == DESCRIPTION_LIMIT + ELLIPSIS.chars().count() && s.ends_with(ELLIPSIS) {
        return s.to_string();
    }
    let mut out: String = s.chars().take(DESCRIPTION_LIMIT).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Full description pipeline: clean, reject debris/short text, truncate.
pub fn sanitize_description(s: &str) -> String {
    let text = clean_text(s);
    if has_markup_remnants(&text) || text.chars().count() < 3 {
        return NO_DESCRIPTION.to_string();
    }
    truncate_description(&text)
}

/// Order-sensitive 32-bit rolling hash over UTF-16 units (`h = h*31 + c`),
/// rendered in base 36. Stable across runs and processes.
pub fn link_hash(link: &str) -> String {
    let mut hash: i32 = 0;
    for unit in link.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    to_base36(hash.unsigned_abs())
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Prefer the upstream id; otherwise derive `<platform>-<link hash>`.
pub fn derive_id(candidate: &Candidate) -> Option<String> {
    if let Some(id) = candidate.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    let link = candidate.link.trim();
    if link.is_empty() {
        return None;
    }
    Some(format!("{}-{}", candidate.platform.slug(), link_hash(link)))
}

/// Turn one candidate into an article. `None` when no title or id can be recovered.
pub fn normalize_candidate(c: Candidate, fetched_at: DateTime<Utc>) -> Option<Article> {
    let id = derive_id(&c)?;
    let title = clean_text(&c.title);
    if title.is_empty() {
        return None;
    }
    let author = {
        let a = clean_text(&c.author);
        if a.is_empty() {
            c.platform.as_str().to_string()
        } else {
            a
        }
    };
    Some(Article {
        id,
        title,
        description: sanitize_description(&c.description),
        link: c.link.trim().to_string(),
        thumbnail: c
            .thumbnail
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        platform: c.platform,
        author,
        category: c
            .category
            .map(|t| clean_text(&t))
            .filter(|t| !t.is_empty()),
        published_at: c.published_at.unwrap_or(fetched_at),
        fetched_at,
    })
}

/// Run-scoped id set: the first occurrence of an id wins.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps unseen articles (in order) and returns how many were dropped.
    pub fn retain_new(&mut self, articles: &mut Vec<Article>) -> usize {
        let before = articles.len();
        articles.retain(|a| self.seen.insert(a.id.clone()));
        before - articles.len()
    }
}

/// Normalize then dedup a candidate batch.
/// Returns (kept, dropped_unusable, dropped_duplicates).
pub fn normalize_dedup(
    fetched_at: DateTime<Utc>,
    raw: Vec<Candidate>,
    dedup: &mut Deduplicator,
) -> (Vec<Article>, usize, usize) {
    let total = raw.len();
    let mut kept: Vec<Article> = raw
        .into_iter()
        .filter_map(|c| normalize_candidate(c, fetched_at))
        .collect();
    let unusable = total - kept.len();
    let dups = dedup.retain_new(&mut kept);
    if dups > 0 {
        metrics::counter!("ingest_dedup_total").increment(dups as u64);
    }
    (kept, unusable, dups)
}

/// Keep articles published within `window` of `now`, newest first.
pub fn filter_fresh(articles: Vec<Article>, now: DateTime<Utc>, window: Duration) -> Vec<Article> {
    let cutoff = now - window;
    let mut out: Vec<Article> = articles
        .into_iter()
        .filter(|a| {
            let keep = a.published_at >= cutoff;
            if !keep {
                tracing::debug!(id = %a.id, published_at = %a.published_at, "dropping stale article");
            }
            keep
        })
        .collect();
    out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Platform;

    #[test]
    fn clean_text_decodes_before_stripping() {
        let s = "  &lt;b&gt;Hello&lt;/b&gt;&nbsp;&nbsp; <i>world</i>  ";
        assert_eq!(clean_text(s), "Hello world");
    }

    #[test]
    fn unterminated_tag_is_removed() {
        assert_eq!(clean_text("Patch notes 14.2 <img src=\"http://x"), "Patch notes 14.2");
    }

    #[test]
    fn bare_angle_brackets_are_text() {
        assert_eq!(
            clean_text("Reroll when HP < 50 and gold > 30"),
            "Reroll when HP < 50 and gold > 30"
        );
        assert_eq!(clean_text("Tier list &lt; 3 cost only"), "Tier list < 3 cost only");
        assert_eq!(clean_text("a <3 b"), "a <3 b");
    }

    #[test]
    fn unterminated_open_tag_is_removed() {
        assert_eq!(clean_text(r#"Comps for 14.2 <div class="x"#), "Comps for 14.2");
    }

    #[test]
    fn embed_debris_becomes_placeholder() {
        let s = "player.bilibili.com/?bvid=1\" frameborder=\"no\" allowfullscreen></iframe>";
        assert_eq!(sanitize_description(s), NO_DESCRIPTION);
    }

    #[test]
    fn short_text_becomes_placeholder() {
        assert_eq!(sanitize_description("<p>ok</p>"), NO_DESCRIPTION);
        assert_eq!(sanitize_description(""), NO_DESCRIPTION);
    }

    #[test]
    fn link_hash_matches_known_values() {
        assert_eq!(link_hash(""), "0");
        // h("a") = 97 -> "2p"
        assert_eq!(link_hash("a"), "2p");
        // h("ab") = 97*31 + 98 = 3105 -> "2e9"
        assert_eq!(link_hash("ab"), "2e9");
    }

    #[test]
    fn derive_id_prefers_upstream_id() {
        let mut c = Candidate::new(Platform::YouTube, "t", "https://youtu.be/x", "a");
        let derived = derive_id(&c).unwrap();
        assert!(derived.starts_with("youtube-"));
        c.id = Some("youtube-abc".into());
        assert_eq!(derive_id(&c).unwrap(), "youtube-abc");
    }

    #[test]
    fn dedup_first_occurrence_wins() {
        let now = Utc::now();
        let mut a = Candidate::new(Platform::TFTimes, "first", "https://x/1", "TFTimes");
        a.id = Some("tftimes-1".into());
        let mut b = a.clone();
        b.title = "second".into();
        let mut dd = Deduplicator::new();
        let (kept, unusable, dups) = normalize_dedup(now, vec![a, b], &mut dd);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "first");
        assert_eq!((unusable, dups), (0, 1));
    }
}
