// =============================================================================
// Dashboard WebSocket — live event push via the broadcast hub
// =============================================================================
//
// Clients connect to `/ws` and receive:
//   1. An immediate `connected` payload carrying the latest prices.
//   2. Every ticker/trade event the hub publishes, in publish order.
//
// The connection ends when the client disconnects or when the hub evicts the
// subscription (buffer overflow); either way the registration is cleaned up.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::hub::{ConnectedBroadcast, StreamMessage};
use crate::pipeline::PipelineContext;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<PipelineContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, ctx))
}

/// Manages a single dashboard connection lifecycle.
async fn handle_ws_connection(socket: WebSocket, ctx: Arc<PipelineContext>) {
    let mut subscription = ctx.hub.subscribe();
    info!(subscriber = %subscription.id, "dashboard client connected");

    let (mut sender, mut receiver) = socket.split();

    // Initial greeting with the latest known prices.
    let prices = match ctx.store.latest_prices().await {
        Ok(prices) => prices,
        Err(e) => {
            warn!(error = %e, "could not load latest prices for greeting");
            HashMap::new()
        }
    };
    let greeting = StreamMessage::Connected(ConnectedBroadcast {
        message: "Connected to Tidepool market data feed".to_string(),
        prices,
    });
    match serde_json::to_string(&greeting) {
        Ok(json) => {
            if sender.send(Message::Text(json)).await.is_err() {
                ctx.hub.unsubscribe(subscription.id);
                return;
            }
        }
        Err(e) => warn!(error = %e, "failed to serialise greeting"),
    }

    loop {
        tokio::select! {
            // ── Hub deliveries ──────────────────────────────────────────
            delivery = subscription.rx.recv() => match delivery {
                Some(payload) => {
                    if let Err(e) = sender.send(Message::Text(payload)).await {
                        debug!(error = %e, "dashboard send failed, disconnecting");
                        break;
                    }
                }
                None => {
                    // The hub evicted this subscription (buffer overflow).
                    debug!(subscriber = %subscription.id, "subscription closed by hub");
                    break;
                }
            },

            // ── Client messages ─────────────────────────────────────────
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    // Any text message is treated as a heartbeat.
                    debug!(msg = %text, "dashboard heartbeat");
                }
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    info!("dashboard close frame received");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "dashboard receive error");
                    break;
                }
                None => break,
            }
        }
    }

    ctx.hub.unsubscribe(subscription.id);
    info!(subscriber = %subscription.id, "dashboard client disconnected");
}
