// tests/ingest_pipeline.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{candidate, ScriptedAdapter};
use content_aggregator::auth::StaticTokenGate;
use content_aggregator::cache::FeedCache;
use content_aggregator::ingest::backoff::BackoffPolicy;
use content_aggregator::ingest::config::InMemoryTargetDirectory;
use content_aggregator::ingest::providers::AdapterRegistry;
use content_aggregator::ingest::types::FetchError;
use content_aggregator::model::{Platform, SourceTarget};
use content_aggregator::persist::PersistenceGateway;
use content_aggregator::pipeline::{Pipeline, PipelineError};
use content_aggregator::progress::ProgressSink;
use content_aggregator::store::memory::MemoryStore;
use tokio_util::sync::CancellationToken;

struct Fixture {
    pipeline: Pipeline,
    store: MemoryStore,
    youtube: Arc<ScriptedAdapter>,
    tacter: Arc<ScriptedAdapter>,
}

fn fixture(youtube: ScriptedAdapter, tacter: ScriptedAdapter, targets: Vec<SourceTarget>) -> Fixture {
    let youtube = Arc::new(youtube);
    let tacter = Arc::new(tacter);
    let registry = AdapterRegistry::new()
        .with(Platform::YouTube, youtube.clone())
        .with(Platform::Tacter, tacter.clone());
    let store = MemoryStore::new();
    let directory = Arc::new(InMemoryTargetDirectory::from_targets(targets).unwrap());
    let pipeline = Pipeline::new(
        registry,
        directory,
        PersistenceGateway::new(Arc::new(store.clone())),
        BackoffPolicy::default(),
    )
    .with_cache(
        Arc::new(FeedCache::with_system_clock(Duration::from_secs(3600))),
        chrono::Duration::days(30),
    );
    Fixture {
        pipeline,
        store,
        youtube,
        tacter,
    }
}

fn yt(id: &str) -> SourceTarget {
    SourceTarget::new(Platform::YouTube, id, id)
}

#[tokio::test(start_paused = true)]
async fn non_admin_trigger_is_rejected_before_any_fetch() {
    let f = fixture(
        ScriptedAdapter::new().script("ch", vec![Ok(vec![candidate(Platform::YouTube, "youtube-1", "C")])]),
        ScriptedAdapter::new(),
        vec![yt("ch")],
    );
    let gate = StaticTokenGate::new(Some("admin-key".into()));

    for cred in [None, Some("viewer-key")] {
        let res = f
            .pipeline
            .trigger(&gate, cred, None, ProgressSink::silent(), CancellationToken::new())
            .await;
        assert!(matches!(res, Err(PipelineError::Unauthorized)));
    }
    assert!(f.youtube.call_order().is_empty());
    assert!(f.store.is_empty().await);

    let summary = f
        .pipeline
        .trigger(&gate, Some("admin-key"), None, ProgressSink::silent(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(f.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn platform_without_targets_is_skipped() {
    let f = fixture(
        ScriptedAdapter::new().script("ch", vec![Ok(vec![candidate(Platform::YouTube, "youtube-1", "C")])]),
        ScriptedAdapter::new(),
        vec![yt("ch")],
    );
    let (sink, mut rx) = ProgressSink::channel();
    let summary = f.pipeline.run(None, sink, CancellationToken::new()).await;

    assert_eq!(summary.skipped, vec![Platform::Tacter]);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.exit_code(), 0);
    assert!(f.tacter.call_order().is_empty());

    let mut lines = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        lines.push(ev.to_string());
    }
    assert!(lines.iter().any(|l| l == "[Tacter] skipped: no enabled targets"));
}

#[tokio::test(start_paused = true)]
async fn platforms_run_side_by_side_and_failures_set_exit_code() {
    let f = fixture(
        ScriptedAdapter::new()
            .script("good", vec![Ok(vec![candidate(Platform::YouTube, "youtube-g", "C")])])
            .script("bad", vec![Err(FetchError::Status { status: 500 })]),
        ScriptedAdapter::new().script(
            "tftpro",
            vec![Ok(vec![candidate(Platform::Tacter, "tacter-1", "tftpro")])],
        ),
        vec![
            yt("good"),
            yt("bad"),
            SourceTarget::new(Platform::Tacter, "tftpro", "tftpro"),
        ],
    );
    let summary = f.pipeline.run(None, ProgressSink::silent(), CancellationToken::new()).await;

    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.totals().created, 2);
    // the failing YouTube target kept retrying while Tacter finished on its first call
    let tacter_at = f.tacter.calls_for("tftpro")[0];
    let last_bad = *f.youtube.calls_for("bad").last().unwrap();
    assert!(tacter_at < last_bad);
}

#[tokio::test(start_paused = true)]
async fn run_can_be_limited_to_selected_platforms() {
    let f = fixture(
        ScriptedAdapter::new().script("ch", vec![Ok(vec![candidate(Platform::YouTube, "youtube-1", "C")])]),
        ScriptedAdapter::new().script("tftpro", vec![Ok(vec![])]),
        vec![yt("ch"), SourceTarget::new(Platform::Tacter, "tftpro", "tftpro")],
    );
    let summary = f
        .pipeline
        .run(
            Some(&[Platform::Tacter][..]),
            ProgressSink::silent(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].platform, Platform::Tacter);
    assert!(f.youtube.call_order().is_empty());
}

#[tokio::test(start_paused = true)]
async fn preview_filters_stale_items_persists_nothing_and_is_cached() {
    let mut stale = candidate(Platform::YouTube, "youtube-old", "C");
    stale.published_at = Some(Utc::now() - chrono::Duration::days(45));
    let mut recent = candidate(Platform::YouTube, "youtube-new", "C");
    recent.published_at = Some(Utc::now() - chrono::Duration::days(2));

    let f = fixture(
        ScriptedAdapter::new()
            .script("a", vec![Ok(vec![stale, recent.clone()])])
            .script("b", vec![Err(FetchError::Status { status: 500 })])
            .script("c", vec![Ok(vec![recent, candidate(Platform::YouTube, "youtube-c", "C")])]),
        ScriptedAdapter::new(),
        vec![yt("a"), yt("b"), yt("c")],
    );

    let first = f.pipeline.preview(Platform::YouTube).await.unwrap();
    let ids: Vec<&str> = first.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["youtube-c", "youtube-new"], "newest first, stale and duplicate dropped");
    assert!(f.store.is_empty().await);
    assert_eq!(f.youtube.call_order(), vec!["a", "b", "c"], "one pass, no retries");

    let second = f.pipeline.preview(Platform::YouTube).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(f.youtube.call_order().len(), 3, "served from cache");
    assert!(f.pipeline.cache().is_valid(Platform::YouTube));
}

#[tokio::test]
async fn preview_without_adapter_is_an_error() {
    let f = fixture(ScriptedAdapter::new(), ScriptedAdapter::new(), vec![]);
    assert!(matches!(
        f.pipeline.preview(Platform::Bilibili).await,
        Err(PipelineError::NoAdapter(Platform::Bilibili))
    ));
}
