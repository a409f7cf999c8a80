// src/api.rs
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::Utc;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::auth::{AccessGate, Role};
use crate::metrics::Metrics;
use crate::model::Platform;
use crate::pipeline::Pipeline;
use crate::progress::ProgressSink;
use crate::stats::{self, ListRequest};
use crate::store::{ArticleStore, StoreError};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArticleStore>,
    pub pipeline: Arc<Pipeline>,
    pub gate: Arc<dyn AccessGate>,
    /// Parent of every triggered run's token.
    pub shutdown: CancellationToken,
    running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, gate: Arc<dyn AccessGate>) -> Self {
        Self {
            store: pipeline.gateway().store().clone(),
            pipeline,
            gate,
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs started over HTTP are cancelled when `token` is.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// Public routes plus `/metrics` when a recorder is installed.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/status", get(feeds_status))
        .route("/api/authors", get(authors))
        .route("/api/platforms", get(platforms))
        .route("/api/aggregation/stats", get(aggregation_stats))
        .route("/api/fetch", get(trigger_fetch).post(trigger_fetch))
        .with_state(state);
    let app = match metrics {
        Some(m) => api.merge(m.router()),
        None => api,
    };
    app.layer(CorsLayer::very_permissive())
}

struct ApiError(StatusCode, String);

/// Clears the in-flight flag when the triggered run ends, however it ends.
struct RunSlot(Arc<AtomicBool>);

impl RunSlot {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "store query failed");
        ApiError(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    }
}

fn parse_platform(raw: Option<&str>) -> Result<Option<Platform>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty() && *s != "all") {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e: crate::model::UnknownPlatform| ApiError(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

/// `x-api-key` header or `Authorization: Bearer ...`.
fn credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(k) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(k);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match state.gate.role_for(credential(headers)) {
        Some(Role::Admin) => Ok(()),
        _ => Err(ApiError(StatusCode::FORBIDDEN, "admin role required".into())),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedsQuery {
    platform: Option<String>,
    author: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn list_feeds(
    State(state): State<AppState>,
    Query(q): Query<FeedsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = stats::list_articles(
        state.store.as_ref(),
        ListRequest {
            platform: parse_platform(q.platform.as_deref())?,
            author: q.author,
            page: q.page,
            page_size: q.page_size,
        },
    )
    .await?;
    Ok(Json(listing))
}

async fn feeds_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let status = stats::refresh_status(state.store.as_ref()).await?;
    let cache = state.pipeline.cache();
    let previews: Vec<_> = state
        .pipeline
        .platforms()
        .into_iter()
        .map(|p| {
            json!({
                "platform": p,
                "cached": cache.is_valid(p),
                "lastUpdated": cache.last_updated(p),
                "remainingTtlSecs": cache.remaining_ttl(p).map(|d| d.as_secs()),
            })
        })
        .collect();
    Ok(Json(json!({ "store": status, "previewCache": previews })))
}

#[derive(Debug, Default, Deserialize)]
struct PlatformQuery {
    platform: Option<String>,
}

async fn authors(
    State(state): State<AppState>,
    Query(q): Query<PlatformQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let only = parse_platform(q.platform.as_deref())?;
    Ok(Json(stats::authors_by_platform(state.store.as_ref(), only).await?))
}

async fn platforms(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(stats::platforms(state.store.as_ref()).await?))
}

async fn aggregation_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(stats::author_activity(state.store.as_ref(), Utc::now()).await?))
}

#[derive(Debug, Default, Deserialize)]
struct FetchQuery {
    /// Comma-separated platform names; empty means all.
    platforms: Option<String>,
}

fn parse_platform_list(raw: Option<&str>) -> Result<Vec<Platform>, ApiError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Platform>()
                .map_err(|e| ApiError(StatusCode::BAD_REQUEST, e.to_string()))
        })
        .collect()
}

/// Starts a full run and streams progress lines as SSE; the final `end`
/// event carries the run's exit code. Dropping the response body (client
/// disconnect) cancels the run.
async fn trigger_fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<FetchQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // authorization is decided before the stream starts
    require_admin(&state, &headers)?;
    let selected = parse_platform_list(q.platforms.as_deref())?;
    let slot = RunSlot::claim(&state.running)
        .ok_or_else(|| ApiError(StatusCode::CONFLICT, "a run is already in progress".into()))?;
    let (sink, rx) = ProgressSink::channel();
    let (done_tx, done_rx) = oneshot::channel::<i32>();

    let pipeline = state.pipeline.clone();
    let gate = state.gate.clone();
    let cred = credential(&headers).map(str::to_owned);
    let token = state.shutdown.child_token();
    let run_token = token.clone();
    let guard = token.drop_guard();
    let run = async move {
        let platforms = (!selected.is_empty()).then_some(selected.as_slice());
        pipeline
            .trigger(
                gate.as_ref(),
                cred.as_deref(),
                platforms,
                sink,
                run_token,
            )
            .await
    };
    tokio::spawn(async move {
        let code = match run.await {
            Ok(s) => s.exit_code(),
            Err(e) => {
                tracing::warn!(error = %e, "triggered run rejected");
                1
            }
        };
        // free the slot before the client sees `end`
        drop(slot);
        let _ = done_tx.send(code);
    });

    let lines = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|ev| (Ok::<_, Infallible>(Event::default().data(ev.to_string())), rx))
    });
    let end = stream::once(async move {
        // held until the body finishes or is dropped
        let _guard = guard;
        let code = done_rx.await.unwrap_or(1);
        Ok::<_, Infallible>(Event::default().event("end").data(code.to_string()))
    });
    Ok(Sse::new(lines.chain(end)).keep_alive(KeepAlive::default()))
}
