// =============================================================================
// QuestDB store — time-series persistence over the PostgreSQL wire protocol
// =============================================================================
//
// QuestDB speaks the PG wire protocol on port 8812, so a plain sqlx PgPool
// works; the SQL below uses QuestDB's dialect (`last()`, `dateadd`,
// designated timestamps). The store is append-only: candle idempotence is
// enforced by the aggregator excluding already-materialized buckets, not by
// `ON CONFLICT`.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::errors::StoreError;
use crate::storage::store::{IngestStats, MarketStore};
use crate::types::{Candle, Ticker, Trade, TradeSide};

/// Table schemas. `timestamp(timestamp)` designates the timestamp column and
/// daily partitioning keeps the trailing-window queries cheap.
const SCHEMAS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS coinbase_trades (
        symbol SYMBOL,
        price DOUBLE,
        size DOUBLE,
        side SYMBOL,
        trade_id LONG,
        timestamp TIMESTAMP
    ) timestamp(timestamp) PARTITION BY DAY;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coinbase_ticker (
        symbol SYMBOL,
        best_bid DOUBLE,
        best_ask DOUBLE,
        last_price DOUBLE,
        spread DOUBLE,
        volume_24h DOUBLE,
        timestamp TIMESTAMP
    ) timestamp(timestamp) PARTITION BY DAY;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coinbase_candles (
        symbol SYMBOL,
        open DOUBLE,
        high DOUBLE,
        low DOUBLE,
        close DOUBLE,
        volume DOUBLE,
        trade_count LONG,
        timestamp TIMESTAMP
    ) timestamp(timestamp) PARTITION BY DAY;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS coinbase_spot_prices (
        base SYMBOL,
        currency SYMBOL,
        amount DOUBLE,
        timestamp TIMESTAMP
    ) timestamp(timestamp) PARTITION BY DAY;
    "#,
];

/// QuestDB-backed implementation of [`MarketStore`].
pub struct QuestStore {
    pool: PgPool,
}

impl QuestStore {
    /// Connect to QuestDB. The pool is shared by the feed loop, the
    /// aggregator loop, and the API handlers; each call checks out its own
    /// connection.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        info!("connected to QuestDB");
        Ok(Self { pool })
    }

    /// Create all tables if they do not exist yet.
    pub async fn create_tables(&self) -> Result<(), StoreError> {
        for schema in SCHEMAS {
            sqlx::query(schema).execute(&self.pool).await?;
        }
        info!(tables = SCHEMAS.len(), "QuestDB tables created/verified");
        Ok(())
    }
}

#[async_trait]
impl MarketStore for QuestStore {
    async fn insert_ticker(&self, ticker: &Ticker) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coinbase_ticker \
             (symbol, best_bid, best_ask, last_price, spread, volume_24h, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&ticker.symbol)
        .bind(ticker.best_bid)
        .bind(ticker.best_ask)
        .bind(ticker.last_price)
        .bind(ticker.spread())
        .bind(ticker.volume_24h)
        .bind(ticker.time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coinbase_trades \
             (symbol, price, size, side, trade_id, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&trade.symbol)
        .bind(trade.price)
        .bind(trade.size)
        .bind(trade.side.as_str())
        .bind(trade.trade_id)
        .bind(trade.time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_spot_price(
        &self,
        base: &str,
        currency: &str,
        amount: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO coinbase_spot_prices (base, currency, amount, timestamp) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(base)
        .bind(currency)
        .bind(amount)
        .bind(chrono::Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_candles(&self, candles: &[Candle]) -> Result<u64, StoreError> {
        let mut written = 0u64;
        for candle in candles {
            sqlx::query(
                "INSERT INTO coinbase_candles \
                 (symbol, open, high, low, close, volume, trade_count, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&candle.symbol)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.trade_count)
            .bind(candle.bucket_start)
            .execute(&self.pool)
            .await?;
            written += 1;
        }
        Ok(written)
    }

    async fn trades_since(&self, since: NaiveDateTime) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, price, size, side, trade_id, timestamp \
             FROM coinbase_trades WHERE timestamp >= $1 ORDER BY timestamp",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let side_raw: String = row.try_get("side")?;
            let side = TradeSide::parse(&side_raw)
                .ok_or_else(|| StoreError::BadRow(format!("unknown trade side `{side_raw}`")))?;
            trades.push(Trade {
                symbol: row.try_get("symbol")?,
                price: row.try_get("price")?,
                size: row.try_get("size")?,
                side,
                trade_id: row.try_get("trade_id")?,
                time: row.try_get("timestamp")?,
            });
        }
        Ok(trades)
    }

    async fn candle_buckets_since(
        &self,
        since: NaiveDateTime,
    ) -> Result<HashSet<(String, NaiveDateTime)>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, timestamp FROM coinbase_candles WHERE timestamp >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut buckets = HashSet::with_capacity(rows.len());
        for row in rows {
            buckets.insert((row.try_get("symbol")?, row.try_get("timestamp")?));
        }
        Ok(buckets)
    }

    async fn latest_prices(&self) -> Result<HashMap<String, f64>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, last(last_price) AS price \
             FROM coinbase_ticker \
             WHERE timestamp > dateadd('m', -5, now()) \
             GROUP BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut prices = HashMap::with_capacity(rows.len());
        for row in rows {
            prices.insert(row.try_get("symbol")?, row.try_get("price")?);
        }
        Ok(prices)
    }

    async fn recent_candles(&self, symbol: &str, limit: i64) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, open, high, low, close, volume, trade_count, timestamp \
             FROM coinbase_candles \
             WHERE symbol = $1 \
             ORDER BY timestamp DESC \
             LIMIT $2",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Candle {
                symbol: row.try_get("symbol")?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                trade_count: row.try_get("trade_count")?,
                bucket_start: row.try_get("timestamp")?,
            });
        }
        Ok(candles)
    }

    async fn ingest_stats(&self) -> Result<IngestStats, StoreError> {
        let row = sqlx::query(
            "SELECT count() AS n FROM coinbase_trades \
             WHERE timestamp > dateadd('h', -1, now())",
        )
        .fetch_one(&self.pool)
        .await?;
        let trades_last_hour: i64 = row.try_get("n")?;

        let latest_prices = self.latest_prices().await?;

        let rows = sqlx::query(
            "SELECT symbol, sum(size) AS volume FROM coinbase_trades \
             WHERE timestamp > dateadd('h', -24, now()) \
             GROUP BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut volume_24h = HashMap::with_capacity(rows.len());
        for row in rows {
            volume_24h.insert(row.try_get("symbol")?, row.try_get("volume")?);
        }

        Ok(IngestStats {
            trades_last_hour,
            latest_prices,
            volume_24h,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
