// src/main.rs
//! Content aggregator binary: one-shot fetch runs, previews, stats, or the HTTP server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use content_aggregator::api::{self, AppState};
use content_aggregator::auth::StaticTokenGate;
use content_aggregator::config::AppConfig;
use content_aggregator::ingest::http::ReqwestFetcher;
use content_aggregator::metrics::Metrics;
use content_aggregator::model::Platform;
use content_aggregator::progress::ProgressSink;
use content_aggregator::{build_directory, build_pipeline, build_registry, build_store, stats};

#[derive(Debug, Parser)]
#[command(name = "content-aggregator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch every enabled target and persist the results.
    Fetch {
        /// Limit the run to these platforms (repeatable).
        #[arg(long = "platform", short)]
        platforms: Vec<Platform>,
    },
    /// Single pass over one platform, printed as JSON, nothing stored.
    Preview {
        #[arg(long, short)]
        platform: Platform,
    },
    /// Print per-author activity from the store.
    Stats,
    /// Serve the read API and the admin trigger.
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
}

/// `RUST_LOG` wins; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("content_aggregator=info,ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current attempt");
            t.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<i32> {
    let cfg = AppConfig::load_default()?;
    let http = Arc::new(ReqwestFetcher::new(cfg.backoff.request_timeout())?);
    let store = build_store(&cfg).await?;

    match cli.command {
        Command::Stats => {
            let rows = stats::author_activity(store.as_ref(), chrono::Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(0)
        }
        Command::Fetch { platforms } => {
            let pipeline = build_pipeline(&cfg, build_registry(&cfg, http), build_directory(&cfg)?, store);
            let selected = (!platforms.is_empty()).then_some(platforms.as_slice());
            let summary = pipeline
                .run(selected, ProgressSink::silent(), cancel_on_ctrl_c())
                .await;
            let t = summary.totals();
            println!(
                "created {}, updated {}, failed {}, skipped platforms {:?}",
                t.created, t.updated, t.failed, summary.skipped
            );
            Ok(summary.exit_code())
        }
        Command::Preview { platform } => {
            let pipeline = build_pipeline(&cfg, build_registry(&cfg, http), build_directory(&cfg)?, store);
            let articles = pipeline.preview(platform).await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
            Ok(0)
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
            let pipeline = Arc::new(build_pipeline(
                &cfg,
                build_registry(&cfg, http),
                build_directory(&cfg)?,
                store,
            ));
            let gate = Arc::new(StaticTokenGate::new(cfg.server.admin_api_key.clone()));
            if cfg.server.admin_api_key.is_none() {
                tracing::warn!("ADMIN_API_KEY not set; the fetch trigger is disabled");
            }
            let metrics = if cfg.server.metrics {
                Some(Metrics::init(cfg.cache.ttl_secs)?)
            } else {
                None
            };
            let shutdown = cancel_on_ctrl_c();
            let state = AppState::new(pipeline, gate).with_shutdown(shutdown.clone());
            let app = api::router(state, metrics.as_ref());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            tracing::info!(%addr, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("server error")?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code.clamp(1, 255) as u8),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal");
            ExitCode::FAILURE
        }
    }
}
