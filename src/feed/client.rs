// =============================================================================
// Feed Client — upstream WebSocket connection lifecycle
// =============================================================================
//
// Connect, subscribe, stream, and reconnect-with-delay on any transport
// failure, for the lifetime of the process. Decoded events are handed to an
// `EventSink`; a sink failure affects only that one event. The stop signal
// is observed within one frame read or one reconnect delay.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::feed::decode::decode_frame;
use crate::types::{FeedEvent, Ticker, Trade};

/// Consumer of decoded feed events.
///
/// Implemented by the pipeline (persist + broadcast). A returned error means
/// that one event was dropped; the stream keeps running.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_ticker(&self, ticker: &Ticker) -> Result<()>;
    async fn on_trade(&self, trade: &Trade) -> Result<()>;
}

/// Subscription request sent immediately after connecting.
#[derive(Serialize)]
struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: &'a [String],
    channels: [&'static str; 2],
}

/// Manages the upstream feed connection: connect, subscribe, stream,
/// reconnect.
pub struct FeedClient {
    url: String,
    products: Vec<String>,
    reconnect_delay: Duration,
    sink: Arc<dyn EventSink>,
    /// Exposed to the health endpoint.
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl FeedClient {
    pub fn new(
        url: String,
        products: Vec<String>,
        reconnect_delay: Duration,
        sink: Arc<dyn EventSink>,
        connected: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url,
            products,
            reconnect_delay,
            sink,
            connected,
            cancel,
        }
    }

    /// Run until the stop signal fires. Every transport failure is answered
    /// with a fixed reconnect delay; there is no retry cap.
    pub async fn run(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_stream().await {
                Ok(()) => info!("feed stream ended"),
                Err(e) => error!(error = %e, "feed transport error"),
            }
            self.connected.store(false, Ordering::SeqCst);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("feed client stopped");
    }

    /// One connection lifetime: open the transport, subscribe, then stream
    /// frames until the connection dies or the stop signal fires.
    async fn connect_and_stream(&self) -> Result<()> {
        info!(url = %self.url, products = ?self.products, "connecting to feed");

        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .context("failed to connect to feed WebSocket")?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::to_string(&SubscribeRequest {
            kind: "subscribe",
            product_ids: &self.products,
            channels: ["ticker", "matches"],
        })
        .context("failed to serialise subscribe request")?;

        write
            .send(Message::Text(subscribe))
            .await
            .context("failed to send subscribe request")?;

        info!("subscribed to ticker + matches channels");
        self.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("stop signal received, closing feed connection");
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text).await,
                    // Ping/Pong are answered by tungstenite; Binary and Close
                    // frames carry nothing we consume.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "feed WebSocket read error");
                        return Err(e.into());
                    }
                    None => {
                        warn!("feed WebSocket stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Decode one frame and hand the event to the sink. Neither a decode
    /// failure nor a sink failure aborts the stream.
    async fn dispatch(&self, text: &str) {
        match decode_frame(text) {
            Ok(Some(FeedEvent::Ticker(ticker))) => {
                if let Err(e) = self.sink.on_ticker(&ticker).await {
                    error!(symbol = %ticker.symbol, error = %e, "ticker sink failure, event dropped");
                }
            }
            Ok(Some(FeedEvent::Trade(trade))) => {
                if let Err(e) = self.sink.on_trade(&trade).await {
                    error!(symbol = %trade.symbol, error = %e, "trade sink failure, event dropped");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
