// tests/api_http.rs
//
// HTTP-level tests for the public Router without opening sockets,
// driven through tower::ServiceExt::oneshot.
mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use common::{article, candidate, ScriptedAdapter};
use futures::StreamExt as _;
use content_aggregator::api::{self, AppState};
use content_aggregator::auth::StaticTokenGate;
use content_aggregator::ingest::backoff::BackoffPolicy;
use content_aggregator::ingest::config::InMemoryTargetDirectory;
use content_aggregator::ingest::providers::AdapterRegistry;
use content_aggregator::ingest::types::FetchError;
use content_aggregator::model::{Platform, SourceTarget};
use content_aggregator::persist::PersistenceGateway;
use content_aggregator::pipeline::Pipeline;
use content_aggregator::store::memory::MemoryStore;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

const BODY_LIMIT: usize = 1024 * 1024;
const ADMIN_KEY: &str = "test-admin-key";

fn test_router() -> (Router, MemoryStore) {
    let now = Utc::now();
    let store = MemoryStore::from_articles(vec![
        article("youtube-1", Platform::YouTube, "Alpha", now - Duration::days(1)),
        article("youtube-2", Platform::YouTube, "Alpha", now - Duration::days(2)),
        article("youtube-3", Platform::YouTube, "Beta", now - Duration::days(3)),
        article("tacter-1", Platform::Tacter, "tftpro", now - Duration::days(4)),
    ]);
    let adapter = Arc::new(ScriptedAdapter::new().script(
        "chan",
        vec![Ok(vec![candidate(Platform::YouTube, "youtube-new", "Alpha")])],
    ));
    let directory = Arc::new(
        InMemoryTargetDirectory::from_targets(vec![SourceTarget::new(
            Platform::YouTube,
            "Alpha",
            "chan",
        )])
        .unwrap(),
    );
    let pipeline = Pipeline::new(
        AdapterRegistry::new().with(Platform::YouTube, adapter),
        directory,
        PersistenceGateway::new(Arc::new(store.clone())),
        BackoffPolicy::default(),
    );
    let state = AppState::new(
        Arc::new(pipeline),
        Arc::new(StaticTokenGate::new(Some(ADMIN_KEY.into()))),
    );
    (api::router(state, None), store)
}

async fn get(app: Router, uri: &str, key: Option<&str>) -> (StatusCode, String) {
    let mut req = Request::builder().method("GET").uri(uri);
    if let Some(k) = key {
        req = req.header("x-api-key", k);
    }
    let resp = app
        .oneshot(req.body(Body::empty()).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, String::from_utf8(bytes).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_router();
    let (status, body) = get(app, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn feeds_are_paginated_newest_first() {
    let (app, _) = test_router();
    let (status, body) = get(app, "/api/feeds?platform=YouTube&page=1&pageSize=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).expect("json");
    assert_eq!(v["total"], 3);
    assert_eq!(v["totalPages"], 2);
    assert_eq!(v["pageSize"], 2);
    let items = v["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], "youtube-1");
    assert!(items[0].get("publishedAt").is_some());
}

#[tokio::test]
async fn unknown_platform_is_a_bad_request() {
    let (app, _) = test_router();
    let (status, body) = get(app, "/api/feeds?platform=Myspace", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("unknown platform"));
}

#[tokio::test]
async fn platforms_and_authors_lists() {
    let (app, _) = test_router();
    let (_, body) = get(app.clone(), "/api/platforms", None).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["value"], "Tacter");
    assert_eq!(v[1]["value"], "YouTube");
    assert_eq!(v[1]["count"], 3);

    let (_, body) = get(app, "/api/authors?platform=youtube", None).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 1);
    assert_eq!(v[0]["authors"][0]["value"], "Alpha");
    assert_eq!(v[0]["authors"][0]["count"], 2);
}

#[tokio::test]
async fn status_reports_store_and_cache() {
    let (app, _) = test_router();
    let (status, body) = get(app, "/api/feeds/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["store"]["total"], 4);
    assert_eq!(v["previewCache"][0]["platform"], "YouTube");
    assert_eq!(v["previewCache"][0]["cached"], false);
}

#[tokio::test]
async fn aggregation_stats_require_admin() {
    let (app, _) = test_router();
    let (status, _) = get(app.clone(), "/api/aggregation/stats", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = get(app, "/api/aggregation/stats", Some(ADMIN_KEY)).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v[0]["platform"], "Tacter");
    assert_eq!(v[1]["author"], "Alpha");
    assert_eq!(v[1]["totalCount"], 2);
    assert_eq!(v[1]["recentCount"], 2);
}

#[tokio::test]
async fn fetch_trigger_rejects_non_admin_without_side_effects() {
    let (app, store) = test_router();
    let (status, _) = get(app.clone(), "/api/fetch", Some("wrong")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = get(app, "/api/fetch", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(store.len().await, 4);
}

#[tokio::test]
async fn fetch_trigger_streams_progress_and_exit_code() {
    let (app, store) = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/api/fetch?platforms=YouTube")
        .header("authorization", format!("Bearer {ADMIN_KEY}"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(ct.starts_with("text/event-stream"), "content-type was {ct}");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("data: [YouTube] starting with 1 target(s)"), "{text}");
    assert!(text.contains("data: [YouTube] done: 1 succeeded, 0 failed"), "{text}");
    assert!(text.contains("event: end\ndata: 0"), "{text}");
    assert!(store.get("youtube-new").await.is_some());
}

/// One YouTube target, "down", that always answers 502.
fn failing_router(shutdown: CancellationToken) -> (Router, Arc<ScriptedAdapter>) {
    let adapter = Arc::new(
        ScriptedAdapter::new().script("down", vec![Err(FetchError::Status { status: 502 })]),
    );
    let directory = Arc::new(
        InMemoryTargetDirectory::from_targets(vec![SourceTarget::new(
            Platform::YouTube,
            "Alpha",
            "down",
        )])
        .unwrap(),
    );
    let pipeline = Pipeline::new(
        AdapterRegistry::new().with(Platform::YouTube, adapter.clone()),
        directory,
        PersistenceGateway::new(Arc::new(MemoryStore::new())),
        BackoffPolicy::default(),
    );
    let state = AppState::new(
        Arc::new(pipeline),
        Arc::new(StaticTokenGate::new(Some(ADMIN_KEY.into()))),
    )
    .with_shutdown(shutdown);
    (api::router(state, None), adapter)
}

fn admin_fetch() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/fetch")
        .header("authorization", format!("Bearer {ADMIN_KEY}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn disconnecting_the_stream_stops_the_run() {
    let (app, adapter) = failing_router(CancellationToken::new());
    let resp = app.oneshot(admin_fetch()).await.unwrap();
    let mut frames = resp.into_body().into_data_stream();
    loop {
        let frame = frames.next().await.expect("stream ended early").unwrap();
        if String::from_utf8_lossy(&frame).contains("fetching down") {
            break;
        }
    }
    drop(frames);

    // An uncancelled run would use all ten attempts well within the hour.
    tokio::time::sleep(StdDuration::from_secs(3600)).await;
    let seen = adapter.calls_for("down").len();
    assert!(seen < 10, "run kept going after disconnect: {seen} attempts");
    tokio::time::sleep(StdDuration::from_secs(3600)).await;
    assert_eq!(adapter.calls_for("down").len(), seen);
}

#[tokio::test(start_paused = true)]
async fn server_shutdown_cancels_triggered_runs() {
    let shutdown = CancellationToken::new();
    let (app, adapter) = failing_router(shutdown.clone());
    let resp = app.oneshot(admin_fetch()).await.unwrap();

    let stop = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_secs(20)).await;
        stop.cancel();
    });
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: end\ndata: 1"), "{text}");
    assert!(adapter.calls_for("down").len() < 10);
}

#[tokio::test(start_paused = true)]
async fn overlapping_trigger_is_rejected() {
    let shutdown = CancellationToken::new();
    let (app, _) = failing_router(shutdown.clone());
    let first = app.clone().oneshot(admin_fetch()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.clone().oneshot(admin_fetch()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    shutdown.cancel();
    body::to_bytes(first.into_body(), BODY_LIMIT).await.unwrap();
    // the end event is sent after the run task released its slot
    let third = app.oneshot(admin_fetch()).await.unwrap();
    assert_eq!(third.status(), StatusCode::OK);
}
