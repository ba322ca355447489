// =============================================================================
// Tidepool — Coinbase market-data ingestion service, main entry point
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod candles;
mod config;
mod errors;
mod feed;
mod hub;
mod pipeline;
mod spot;
mod storage;
mod timeutil;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::pipeline::{Pipeline, PipelineContext};
use crate::storage::{MarketStore, QuestStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Tidepool market data service starting");

    let mut config = Config::load("tidepool.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config file, using defaults");
        Config::default()
    });
    config.apply_env_overrides();

    info!(symbols = ?config.symbols, "configured trading pairs");

    // ── 2. Store ─────────────────────────────────────────────────────────
    let store = QuestStore::connect(&config.database_url)
        .await
        .context("failed to connect to QuestDB")?;
    store
        .create_tables()
        .await
        .context("failed to create QuestDB tables")?;
    let store: Arc<dyn MarketStore> = Arc::new(store);

    // ── 3. Shared context & pipeline ─────────────────────────────────────
    let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer));
    let bind_addr = config.bind_addr.clone();
    let ctx = Arc::new(PipelineContext::new(config, store, hub));

    let pipeline = Pipeline::new(ctx.clone());
    pipeline.start();

    // ── 4. API server ────────────────────────────────────────────────────
    let api_ctx = ctx.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_ctx);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping pipeline");

    pipeline.stop().await;

    info!("Tidepool shut down complete");
    Ok(())
}
