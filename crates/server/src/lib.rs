//! Mend Server Library
//!
//! REST API for accounts, partner pairing and session feedback, plus a
//! WebSocket relay that fans session messages out between partners and
//! lets an AI moderator join in.

pub mod ai;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mail;
pub mod models;
pub mod relay;
pub mod router;
pub mod store;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai::AiService;
use config::{AppState, Config};
use store::SqliteStore;

pub use router::build_router;

/// Time allowed for background tasks to finish after the listener stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();

    // RUST_LOG wins over the configured default filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        // Already set, ignore
    }

    info!("=== Mend Server ===");

    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    info!("Store initialized: {}", config.database_url);

    let ai = AiService::from_config(&config.llm).context("Failed to configure LLM client")?;
    let mailer = mail::notifier_from_config(&config.smtp).context("Failed to configure SMTP")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, Arc::new(store), ai, mailer);
    let tasks = state.tasks.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("Mend server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining background tasks...");
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait_idle()).await.is_err() {
        warn!(
            "Shutdown with {} background task(s) still running",
            tasks.snapshot().in_flight
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
