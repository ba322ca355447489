// =============================================================================
// Broadcast Hub — fan-out of live events to dashboard subscribers
// =============================================================================
//
// Every subscriber owns a bounded mpsc channel. `publish` serialises the
// message once and try-sends to each subscriber; a full or closed channel is
// a delivery failure and that subscriber is evicted on the spot. The
// publisher never waits on a subscriber, and one stuck subscriber cannot
// delay delivery to the others.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{Ticker, Trade, TradeSide};

// =============================================================================
// Wire format
// =============================================================================

/// Ticker payload pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct TickerBroadcast {
    pub symbol: String,
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub spread: f64,
}

impl From<&Ticker> for TickerBroadcast {
    fn from(ticker: &Ticker) -> Self {
        Self {
            symbol: ticker.symbol.clone(),
            price: ticker.last_price,
            bid: ticker.best_bid,
            ask: ticker.best_ask,
            volume: ticker.volume_24h,
            spread: ticker.spread(),
        }
    }
}

/// Trade payload pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct TradeBroadcast {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
    pub time: String,
}

impl From<&Trade> for TradeBroadcast {
    fn from(trade: &Trade) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            price: trade.price,
            size: trade.size,
            side: trade.side,
            time: trade.time.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        }
    }
}

/// Greeting sent once when a dashboard client connects.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedBroadcast {
    pub message: String,
    pub prices: HashMap<String, f64>,
}

/// Everything the hub pushes, in its on-the-wire envelope:
/// `{ "type": "...", "data": { ... } }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamMessage {
    Ticker(TickerBroadcast),
    Trade(TradeBroadcast),
    Connected(ConnectedBroadcast),
}

// =============================================================================
// Hub
// =============================================================================

/// A live registration with the hub. Dropping the receiver (or losing pace
/// with the feed) gets the subscriber evicted on the next publish.
pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<String>,
}

/// Registry of dashboard subscribers.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    /// Channel capacity per subscriber.
    buffer: usize,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = %id, total = self.subscriber_count(), "subscriber registered");
        Subscription { id, rx }
    }

    /// Remove a subscriber explicitly (normal disconnect path).
    pub fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.write().remove(&id).is_some() {
            debug!(subscriber = %id, "subscriber removed");
        }
    }

    /// Deliver `message` to every subscriber. Never blocks on any one
    /// subscriber; a full or closed channel evicts its owner.
    pub fn publish(&self, message: &StreamMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialise broadcast message");
                return;
            }
        };

        let mut dead: Vec<Uuid> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            if subscribers.is_empty() {
                return;
            }
            for (id, tx) in subscribers.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(subscriber = %id, "subscriber buffer full, evicting");
                        dead.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(subscriber = %id, "subscriber channel closed, evicting");
                        dead.push(*id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker_message(price: f64) -> StreamMessage {
        StreamMessage::Ticker(TickerBroadcast {
            symbol: "BTC-USD".into(),
            price,
            bid: price - 0.5,
            ask: price + 0.5,
            volume: 1000.0,
            spread: 1.0,
        })
    }

    #[test]
    fn wire_format_matches_the_published_contract() {
        let json = serde_json::to_string(&ticker_message(50_000.0)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "ticker");
        assert_eq!(value["data"]["symbol"], "BTC-USD");
        assert_eq!(value["data"]["spread"], 1.0);

        let trade = Trade {
            symbol: "ETH-USD".into(),
            price: 2500.0,
            size: 0.5,
            side: TradeSide::Sell,
            time: chrono::NaiveDate::from_ymd_opt(2025, 6, 22)
                .unwrap()
                .and_hms_micro_opt(13, 48, 39, 499_077)
                .unwrap(),
            trade_id: 7,
        };
        let json = serde_json::to_string(&StreamMessage::Trade((&trade).into())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "trade");
        assert_eq!(value["data"]["side"], "sell");
        assert_eq!(value["data"]["time"], "2025-06-22T13:48:39.499077");
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers_in_publish_order() {
        let hub = BroadcastHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        for price in [1.0, 2.0, 3.0] {
            hub.publish(&ticker_message(price));
        }

        for rx in [&mut a.rx, &mut b.rx] {
            for expected in [1.0, 2.0, 3.0] {
                let payload = rx.recv().await.unwrap();
                let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
                assert_eq!(value["data"]["price"], expected);
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_delaying_healthy_one() {
        let hub = BroadcastHub::new(2);
        let _slow = hub.subscribe(); // never drained
        let mut healthy = hub.subscribe();

        // The healthy subscriber drains promptly and receives every message;
        // the slow one overflows its buffer on the third publish and is
        // evicted within that same publish call.
        for price in [1.0, 2.0, 3.0] {
            hub.publish(&ticker_message(price));
            let payload = healthy.rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
            assert_eq!(value["data"]["price"], price);
        }
        assert_eq!(hub.subscriber_count(), 1);

        // Still delivering after the eviction.
        hub.publish(&ticker_message(4.0));
        let payload = healthy.rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["data"]["price"], 4.0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_on_next_publish() {
        let hub = BroadcastHub::new(4);
        let sub = hub.subscribe();
        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(&ticker_message(1.0));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();
        hub.unsubscribe(sub.id);
        assert_eq!(hub.subscriber_count(), 0);
        hub.publish(&ticker_message(1.0));
        // Sender side is gone, so the channel reports closed.
        assert!(sub.rx.recv().await.is_none());
    }

    #[test]
    fn publish_with_no_subscribers_is_a_noop() {
        let hub = BroadcastHub::new(4);
        hub.publish(&ticker_message(1.0));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
