// =============================================================================
// Store interface — the narrow insert/query surface the pipeline consumes
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::errors::StoreError;
use crate::types::{Candle, Ticker, Trade};

/// Ingestion statistics for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct IngestStats {
    pub trades_last_hour: i64,
    pub latest_prices: HashMap<String, f64>,
    pub volume_24h: HashMap<String, f64>,
}

/// Time-series store consumed by the pipeline and the API layer.
///
/// Every call is a self-contained request against a shared connection pool;
/// callers catch and log failures rather than crashing the process.
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn insert_ticker(&self, ticker: &Ticker) -> Result<(), StoreError>;

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError>;

    async fn insert_spot_price(
        &self,
        base: &str,
        currency: &str,
        amount: f64,
    ) -> Result<(), StoreError>;

    /// Insert candle rows; returns the number of rows written.
    async fn insert_candles(&self, candles: &[Candle]) -> Result<u64, StoreError>;

    /// Raw trades with `time >= since`, ordered by time ascending.
    async fn trades_since(&self, since: NaiveDateTime) -> Result<Vec<Trade>, StoreError>;

    /// `(symbol, bucket_start)` pairs already materialized as candles within
    /// the window. Used by the aggregator to keep sweeps idempotent.
    async fn candle_buckets_since(
        &self,
        since: NaiveDateTime,
    ) -> Result<HashSet<(String, NaiveDateTime)>, StoreError>;

    /// Latest ticker price per symbol over the trailing few minutes.
    async fn latest_prices(&self) -> Result<HashMap<String, f64>, StoreError>;

    /// Most recent candles for one symbol, newest first.
    async fn recent_candles(&self, symbol: &str, limit: i64) -> Result<Vec<Candle>, StoreError>;

    async fn ingest_stats(&self) -> Result<IngestStats, StoreError>;

    /// Cheap liveness probe for the health endpoint.
    async fn health_check(&self) -> Result<(), StoreError>;
}
