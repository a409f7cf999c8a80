// tests/providers_embedded_json.rs
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use content_aggregator::ingest::http::{HttpResponse, StubFetcher};
use content_aggregator::ingest::providers::embedded_json::{EmbeddedJsonAdapter, TACTER_ORIGIN};
use content_aggregator::ingest::types::SourceAdapter;
use content_aggregator::ingest::{normalize_candidate, normalize_dedup, Deduplicator};
use content_aggregator::model::{Platform, SourceTarget};

const PROFILE: &str = include_str!("fixtures/tacter_profile.html");
const MALFORMED: &str = include_str!("fixtures/tacter_malformed.html");

fn target() -> SourceTarget {
    SourceTarget::new(Platform::Tacter, "tftpro", "@tftpro").with_description("Guides by tftpro")
}

#[test]
fn guides_are_read_from_the_dehydrated_state() {
    let adapter = EmbeddedJsonAdapter::new(Arc::new(StubFetcher::new()));
    let items = adapter.parse(PROFILE, &target());
    let titles: Vec<&str> = items.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Reroll Vex Carry",
            "Fast 9 Legendaries",
            "Bruiser Flex",
            "Econ Basics",
            "Sixth Guide"
        ],
        "id-less guide dropped, repeated title dropped, capped at five"
    );

    let first = &items[0];
    assert_eq!(first.id.as_deref(), Some("tacter-g-101"));
    assert_eq!(first.link, format!("{TACTER_ORIGIN}/tft/guides/reroll-vex-carry"));
    assert_eq!(first.description, "Champions: Vex, Poppy, Kog'Maw");
    assert_eq!(
        first.thumbnail.as_deref(),
        Some(format!("{TACTER_ORIGIN}/avatars/tftpro.png").as_str())
    );
    assert_eq!(first.category.as_deref(), Some("Guide"));
    assert_eq!(first.author, "tftpro");
    assert_eq!(
        first.published_at,
        Some(Utc.with_ymd_and_hms(2025, 9, 5, 10, 0, 0).unwrap())
    );

    // epoch-millis timestamps and absolute avatar urls
    assert_eq!(
        items[1].published_at,
        Some(Utc.timestamp_millis_opt(1_756_980_000_000).unwrap())
    );
    assert_eq!(
        items[1].thumbnail.as_deref(),
        Some("https://cdn.tacter.com/a/tftpro.png")
    );

    // numeric id, displayName fallback, champions as an array, updatedAt fallback
    assert_eq!(items[2].id.as_deref(), Some("tacter-104"));
    assert_eq!(items[2].description, "Champions: Sett, Volibear");
    assert_eq!(
        items[2].published_at,
        Some(Utc.with_ymd_and_hms(2025, 9, 2, 8, 0, 0).unwrap())
    );

    // no champions: the target's description; no slug: empty link
    assert_eq!(items[3].description, "Guides by tftpro");
    assert_eq!(items[3].link, "");
}

#[test]
fn unreadable_payload_degrades_to_title_scan() {
    let adapter = EmbeddedJsonAdapter::new(Arc::new(StubFetcher::new()));
    let items = adapter.parse(MALFORMED, &target());
    assert_eq!(items.len(), 5);
    assert_eq!(items[0].title, "Tempo Augments");
    assert_eq!(items[4].title, "Scouting 101");
    for (i, c) in items.iter().enumerate() {
        assert_eq!(c.id.as_deref(), Some(format!("tacter-tftpro-{i}").as_str()));
        assert!(c.link.is_empty());
        assert!(c.thumbnail.is_none());
        assert_eq!(c.description, "Guides by tftpro");
    }

    // degraded records still normalize and keep their ids across runs
    let now = Utc::now();
    let (kept, unusable, dups) = normalize_dedup(now, items.clone(), &mut Deduplicator::new());
    assert_eq!((kept.len(), unusable, dups), (5, 0, 0));
    let again = adapter.parse(MALFORMED, &target());
    assert_eq!(
        normalize_candidate(again[2].clone(), now).map(|a| a.id),
        Some(kept[2].id.clone())
    );
}

#[test]
fn page_without_marker_yields_nothing() {
    let adapter = EmbeddedJsonAdapter::new(Arc::new(StubFetcher::new()));
    let html = r#"<html><body>"title":"Not from a payload"</body></html>"#;
    assert!(adapter.parse(html, &target()).is_empty());
}

#[tokio::test]
async fn fetch_hits_the_profile_url() {
    let stub = Arc::new(StubFetcher::new().route(
        "https://tacter.test/@tftpro",
        HttpResponse::ok("text/html", PROFILE),
    ));
    let adapter = EmbeddedJsonAdapter::with_origin(stub.clone(), "https://tacter.test");
    let items = adapter.fetch(&target()).await.unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[0].link, "https://tacter.test/tft/guides/reroll-vex-carry");
    assert_eq!(stub.requested_urls(), vec!["https://tacter.test/@tftpro".to_string()]);
}
