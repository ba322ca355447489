// =============================================================================
// Candle Aggregator — 1-minute OHLCV candles derived from stored trades
// =============================================================================
//
// A timer loop sweeps the trailing trade window every tick, folds trades
// into per-(symbol, minute) candles, and inserts only buckets that are both
// closed and not yet materialized. Re-running a sweep over an unchanged
// window is a no-op, so the derived table never accumulates duplicates.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::StoreError;
use crate::storage::MarketStore;
use crate::types::{Candle, Trade};

/// Width of one aggregation bucket.
const BUCKET_SECS: i64 = 60;

/// Truncate a trade timestamp to its minute boundary.
pub fn bucket_start(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Fold trades into per-(symbol, bucket) candles.
///
/// Trades are ordered by (time, trade_id) before folding, so the same input
/// set always produces the same candle values regardless of arrival order.
/// Output is sorted by (symbol, bucket_start).
pub fn build_candles(trades: &[Trade]) -> Vec<Candle> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by(|a, b| a.time.cmp(&b.time).then(a.trade_id.cmp(&b.trade_id)));

    let mut buckets: BTreeMap<(String, NaiveDateTime), Vec<&Trade>> = BTreeMap::new();
    for trade in ordered {
        buckets
            .entry((trade.symbol.clone(), bucket_start(trade.time)))
            .or_default()
            .push(trade);
    }

    buckets
        .into_iter()
        .filter_map(|((symbol, start), bucket)| {
            let first = *bucket.first()?;
            let last = *bucket.last()?;
            let mut high = f64::MIN;
            let mut low = f64::MAX;
            let mut volume = 0.0;
            for trade in &bucket {
                high = high.max(trade.price);
                low = low.min(trade.price);
                volume += trade.size;
            }
            Some(Candle {
                symbol,
                bucket_start: start,
                open: first.price,
                high,
                low,
                close: last.price,
                volume,
                trade_count: bucket.len() as i64,
            })
        })
        .collect()
}

/// Periodic sweep loop materializing candles into the store.
pub struct CandleAggregator {
    store: Arc<dyn MarketStore>,
    sweep_interval: Duration,
    lookback: chrono::Duration,
    cancel: CancellationToken,
}

impl CandleAggregator {
    pub fn new(
        store: Arc<dyn MarketStore>,
        sweep_interval: Duration,
        lookback_hours: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            sweep_interval,
            lookback: chrono::Duration::hours(lookback_hours),
            cancel,
        }
    }

    /// Run until the stop signal fires. A failed sweep is retried at the
    /// next tick; a sweep that outlives the tick interval is abandoned so it
    /// can never block the following tick.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("candle aggregator stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            match tokio::time::timeout(self.sweep_interval, self.sweep_once()).await {
                Ok(Ok(0)) => debug!("candle sweep found no new buckets"),
                Ok(Ok(written)) => info!(candles = written, "materialized candle records"),
                Ok(Err(e)) => error!(error = %e, "candle sweep failed"),
                Err(_) => warn!("candle sweep exceeded tick interval, abandoned"),
            }
        }
    }

    /// One sweep against the wall clock.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        self.sweep_at(Utc::now().naive_utc()).await
    }

    /// One sweep as of `now`: load the trailing trade window, fold it into
    /// candles, and insert only closed buckets not yet present in the store.
    async fn sweep_at(&self, now: NaiveDateTime) -> Result<usize, StoreError> {
        let since = now - self.lookback;

        let trades = self.store.trades_since(since).await?;
        if trades.is_empty() {
            return Ok(0);
        }

        let mut candles = build_candles(&trades);

        // The bucket containing `now` is still collecting trades; a candle
        // written for it would be frozen incomplete by the exclusion check
        // on the next sweep.
        candles.retain(|c| c.bucket_start + chrono::Duration::seconds(BUCKET_SECS) <= now);

        let existing = self.store.candle_buckets_since(since).await?;
        candles.retain(|c| !existing.contains(&(c.symbol.clone(), c.bucket_start)));

        if candles.is_empty() {
            return Ok(0);
        }
        let written = self.store.insert_candles(&candles).await?;
        Ok(written as usize)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    use crate::storage::IngestStats;
    use crate::types::{Ticker, TradeSide};

    /// In-memory store double for sweep tests.
    #[derive(Default)]
    struct MemoryStore {
        trades: Mutex<Vec<Trade>>,
        candles: Mutex<Vec<Candle>>,
    }

    #[async_trait]
    impl MarketStore for MemoryStore {
        async fn insert_ticker(&self, _ticker: &Ticker) -> Result<(), StoreError> {
            Ok(())
        }

        async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
            self.trades.lock().push(trade.clone());
            Ok(())
        }

        async fn insert_spot_price(
            &self,
            _base: &str,
            _currency: &str,
            _amount: f64,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn insert_candles(&self, candles: &[Candle]) -> Result<u64, StoreError> {
            self.candles.lock().extend_from_slice(candles);
            Ok(candles.len() as u64)
        }

        async fn trades_since(&self, since: NaiveDateTime) -> Result<Vec<Trade>, StoreError> {
            let mut trades: Vec<Trade> = self
                .trades
                .lock()
                .iter()
                .filter(|t| t.time >= since)
                .cloned()
                .collect();
            trades.sort_by(|a, b| a.time.cmp(&b.time));
            Ok(trades)
        }

        async fn candle_buckets_since(
            &self,
            since: NaiveDateTime,
        ) -> Result<HashSet<(String, NaiveDateTime)>, StoreError> {
            Ok(self
                .candles
                .lock()
                .iter()
                .filter(|c| c.bucket_start >= since)
                .map(|c| (c.symbol.clone(), c.bucket_start))
                .collect())
        }

        async fn latest_prices(&self) -> Result<HashMap<String, f64>, StoreError> {
            Ok(HashMap::new())
        }

        async fn recent_candles(
            &self,
            symbol: &str,
            limit: i64,
        ) -> Result<Vec<Candle>, StoreError> {
            let mut candles: Vec<Candle> = self
                .candles
                .lock()
                .iter()
                .filter(|c| c.symbol == symbol)
                .cloned()
                .collect();
            candles.sort_by(|a, b| b.bucket_start.cmp(&a.bucket_start));
            candles.truncate(limit as usize);
            Ok(candles)
        }

        async fn ingest_stats(&self) -> Result<IngestStats, StoreError> {
            Ok(IngestStats {
                trades_last_hour: self.trades.lock().len() as i64,
                latest_prices: HashMap::new(),
                volume_24h: HashMap::new(),
            })
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn base_minute() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 22)
            .unwrap()
            .and_hms_opt(13, 48, 0)
            .unwrap()
    }

    fn trade(symbol: &str, price: f64, size: f64, offset_secs: i64, trade_id: i64) -> Trade {
        Trade {
            symbol: symbol.into(),
            price,
            size,
            side: TradeSide::Buy,
            time: base_minute() + chrono::Duration::seconds(offset_secs),
            trade_id,
        }
    }

    fn aggregator(store: Arc<MemoryStore>) -> CandleAggregator {
        CandleAggregator::new(store, Duration::from_secs(30), 24, CancellationToken::new())
    }

    #[test]
    fn bucket_start_truncates_to_minute() {
        let ts = base_minute() + chrono::Duration::seconds(39) + chrono::Duration::microseconds(499_077);
        assert_eq!(bucket_start(ts), base_minute());
        assert_eq!(bucket_start(base_minute()), base_minute());
    }

    #[test]
    fn ohlcv_matches_bucket_contents() {
        let trades = vec![
            trade("BTC-USD", 10.0, 1.0, 0, 1),
            trade("BTC-USD", 12.0, 2.0, 10, 2),
            trade("BTC-USD", 9.0, 3.0, 20, 3),
            trade("BTC-USD", 11.0, 4.0, 59, 4),
        ];
        let candles = build_candles(&trades);
        assert_eq!(candles.len(), 1);
        let candle = &candles[0];
        assert_eq!(candle.bucket_start, base_minute());
        assert!((candle.open - 10.0).abs() < f64::EPSILON);
        assert!((candle.high - 12.0).abs() < f64::EPSILON);
        assert!((candle.low - 9.0).abs() < f64::EPSILON);
        assert!((candle.close - 11.0).abs() < f64::EPSILON);
        assert!((candle.volume - 10.0).abs() < f64::EPSILON);
        assert_eq!(candle.trade_count, 4);
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
    }

    #[test]
    fn arrival_order_does_not_change_candles() {
        let forward = vec![
            trade("BTC-USD", 10.0, 1.0, 0, 1),
            trade("BTC-USD", 12.0, 2.0, 10, 2),
            trade("BTC-USD", 11.0, 4.0, 59, 4),
        ];
        let mut shuffled = forward.clone();
        shuffled.reverse();
        assert_eq!(build_candles(&forward), build_candles(&shuffled));
    }

    #[test]
    fn trades_split_across_symbols_and_buckets() {
        let trades = vec![
            trade("BTC-USD", 10.0, 1.0, 0, 1),
            trade("BTC-USD", 11.0, 1.0, 65, 2),
            trade("ETH-USD", 5.0, 2.0, 30, 3),
        ];
        let candles = build_candles(&trades);
        assert_eq!(candles.len(), 3);
        // BTreeMap keying gives (symbol, bucket) order.
        assert_eq!(candles[0].symbol, "BTC-USD");
        assert_eq!(candles[0].bucket_start, base_minute());
        assert_eq!(candles[1].symbol, "BTC-USD");
        assert_eq!(
            candles[1].bucket_start,
            base_minute() + chrono::Duration::seconds(60)
        );
        assert_eq!(candles[2].symbol, "ETH-USD");
    }

    #[tokio::test]
    async fn sweep_materializes_closed_buckets_only() {
        let store = Arc::new(MemoryStore::default());
        for t in [
            trade("BTC-USD", 10.0, 1.0, 0, 1),
            trade("BTC-USD", 11.0, 1.0, 30, 2),
            // This one lands in the bucket containing `now`.
            trade("BTC-USD", 12.0, 1.0, 70, 3),
        ] {
            store.insert_trade(&t).await.unwrap();
        }
        let agg = aggregator(store.clone());

        let now = base_minute() + chrono::Duration::seconds(90);
        let written = agg.sweep_at(now).await.unwrap();
        assert_eq!(written, 1);

        let candles = store.candles.lock().clone();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].bucket_start, base_minute());
        assert_eq!(candles[0].trade_count, 2);
    }

    #[tokio::test]
    async fn repeated_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        for t in [
            trade("BTC-USD", 10.0, 1.0, 0, 1),
            trade("BTC-USD", 12.0, 2.0, 10, 2),
            trade("ETH-USD", 9.0, 3.0, 20, 3),
        ] {
            store.insert_trade(&t).await.unwrap();
        }
        let agg = aggregator(store.clone());
        let now = base_minute() + chrono::Duration::seconds(120);

        let first = agg.sweep_at(now).await.unwrap();
        assert_eq!(first, 2);
        let after_first = store.candles.lock().clone();

        let second = agg.sweep_at(now).await.unwrap();
        assert_eq!(second, 0);
        let after_second = store.candles.lock().clone();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn late_bucket_is_materialized_by_a_later_sweep() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert_trade(&trade("BTC-USD", 10.0, 1.0, 0, 1))
            .await
            .unwrap();
        let agg = aggregator(store.clone());
        assert_eq!(
            agg.sweep_at(base_minute() + chrono::Duration::seconds(90))
                .await
                .unwrap(),
            1
        );

        // A new trade in the next minute shows up once that bucket closes.
        store
            .insert_trade(&trade("BTC-USD", 11.0, 1.0, 70, 2))
            .await
            .unwrap();
        assert_eq!(
            agg.sweep_at(base_minute() + chrono::Duration::seconds(180))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.candles.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_window_is_a_noop() {
        let store = Arc::new(MemoryStore::default());
        let agg = aggregator(store.clone());
        assert_eq!(agg.sweep_at(base_minute()).await.unwrap(), 0);
        assert!(store.candles.lock().is_empty());
    }
}
