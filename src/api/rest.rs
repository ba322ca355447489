// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only dashboard surface over the store, plus the live WebSocket
// endpoint. CORS is configured permissively for development; tighten the
// allowed origins in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::pipeline::PipelineContext;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router(ctx: Arc<PipelineContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/prices", get(prices))
        .route("/api/stats", get(stats))
        .route("/api/candles/:symbol", get(candles))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(ctx): State<Arc<PipelineContext>>) -> impl IntoResponse {
    let database = match ctx.store.health_check().await {
        Ok(()) => "healthy",
        Err(e) => {
            warn!(error = %e, "store health check failed");
            "unhealthy"
        }
    };
    let feed = if ctx.is_feed_connected() {
        "healthy"
    } else {
        "unhealthy"
    };
    let status = if database == "healthy" && feed == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "database": database,
        "feed": feed,
        "connected_clients": ctx.hub.subscriber_count(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Prices
// =============================================================================

async fn prices(State(ctx): State<Arc<PipelineContext>>) -> impl IntoResponse {
    match ctx.store.latest_prices().await {
        Ok(prices) => Json(prices).into_response(),
        Err(e) => {
            error!(error = %e, "failed to load latest prices");
            store_error_response()
        }
    }
}

// =============================================================================
// Ingestion stats
// =============================================================================

async fn stats(State(ctx): State<Arc<PipelineContext>>) -> impl IntoResponse {
    match ctx.store.ingest_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!(error = %e, "failed to load ingest stats");
            store_error_response()
        }
    }
}

// =============================================================================
// Candles
// =============================================================================

fn default_candle_limit() -> i64 {
    60
}

#[derive(Deserialize)]
struct CandleQuery {
    #[serde(default = "default_candle_limit")]
    limit: i64,
}

async fn candles(
    Path(symbol): Path<String>,
    Query(query): Query<CandleQuery>,
    State(ctx): State<Arc<PipelineContext>>,
) -> impl IntoResponse {
    let limit = query.limit.clamp(1, 1440);
    match ctx.store.recent_candles(&symbol, limit).await {
        Ok(candles) => Json(candles).into_response(),
        Err(e) => {
            error!(symbol = %symbol, error = %e, "failed to load candles");
            store_error_response()
        }
    }
}

fn store_error_response() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "store query failed" })),
    )
        .into_response()
}
