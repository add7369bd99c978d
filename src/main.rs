//! Application entry point for the `machinewatch` backend service.
//!
//! Startup sequence:
//! - Initializing structured logging/tracing
//! - Loading configuration from environment variables or `.env`
//! - Opening the store (PostgreSQL pool plus schema, or the in-process store)
//! - Opening the realtime bridge on the store's change feed
//! - Building the chat assistant when model credentials are present
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Serving until SIGINT/SIGTERM, then closing the bridge
//!
//! # Environment Variables
//! See [`machinewatch::config::load_from_env`] for the service settings, plus:
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//! - `FORCE_COLOR` (optional) – force ANSI colors on or off
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use machinewatch::anomaly::DEFAULT_THRESHOLDS;
use machinewatch::chat::ChatAssistant;
use machinewatch::config::{self, mask_db_url, Config};
use machinewatch::realtime::{FeedSource, Hub, MemoryFeed, RealtimeBridge, ReconnectPolicy};
use machinewatch::store::{MemoryStore, PgStore, Store};
use machinewatch::{router, schema, AppState};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let hub = Hub::new(cfg.realtime_buffer);
    let (store, feed) = open_store(&cfg).await?;

    let bridge =
        RealtimeBridge::open(feed, hub.clone(), DEFAULT_THRESHOLDS, ReconnectPolicy::default())
            .await;

    let chat = match ChatAssistant::from_config(&cfg, store.clone()) {
        Ok(assistant) => Some(Arc::new(assistant)),
        Err(e) => {
            tracing::warn!(error = %e, "Chat assistant disabled");
            None
        }
    };

    // Build app from routes gateway (EMBP)
    let state = AppState::new(store, hub, bridge.watch(), chat);
    let app: Router = router(state, Duration::from_secs(cfg.request_timeout_secs));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Release the feed subscription on both paths
    bridge.close().await;
    served.context("HTTP server failed")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Open the configured store and the change feed that goes with it.
async fn open_store(cfg: &Config) -> Result<(Arc<dyn Store>, Option<FeedSource>)> {
    // ---
    if cfg.uses_memory_store() {
        tracing::warn!("Using in-process store; data is lost on exit");
        let store = MemoryStore::new();
        let feed = FeedSource::Subscribed(Box::new(MemoryFeed::new(store.change_feed())));
        return Ok((Arc::new(store), Some(feed)));
    }

    tracing::info!("Attempting to connect to database: {}", mask_db_url(&cfg.db_url));

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to database '{}'",
                mask_db_url(&cfg.db_url)
            )
        })?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool, &cfg.realtime_channel).await?;

    let feed = cfg
        .realtime_db_url
        .as_ref()
        .map(|url| FeedSource::Postgres {
            url: url.clone(),
            channel: cfg.realtime_channel.clone(),
        });

    Ok((Arc::new(PgStore::new(pool)), feed))
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AXUM_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else the `AXUM_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AXUM_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
