// =============================================================================
// Shared types used across the Tidepool ingestion pipeline
// =============================================================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Taker side of a matched trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Parse the feed's `side` field. Returns `None` for anything other than
    /// `buy` / `sell` (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("buy") {
            Some(Self::Buy)
        } else if raw.eq_ignore_ascii_case("sell") {
            Some(Self::Sell)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A best-bid/best-ask quote snapshot from the ticker channel.
///
/// Timestamps are naive UTC throughout the pipeline; see `timeutil`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub last_price: f64,
    pub volume_24h: f64,
    pub time: NaiveDateTime,
}

impl Ticker {
    /// Bid/ask spread, derived from the raw fields at consumption time.
    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }
}

/// A single matched trade execution from the matches channel.
///
/// `trade_id` comes from the upstream feed and is not globally unique across
/// reconnects; duplicates are possible and acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
    pub time: NaiveDateTime,
    pub trade_id: i64,
}

/// A 1-minute OHLCV candle derived from stored trades.
///
/// Candles are recomputable aggregates: regenerating one from the same
/// underlying trades yields the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Trade timestamp truncated to the minute boundary.
    pub bucket_start: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Sum of trade sizes in the bucket.
    pub volume: f64,
    /// Number of trades in the bucket.
    pub trade_count: i64,
}

/// A decoded feed event, ready for persistence and broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Ticker(Ticker),
    Trade(Trade),
}
