// =============================================================================
// Pipeline Orchestrator — wires the loops together and owns their lifecycle
// =============================================================================
//
// `PipelineContext` replaces ambient globals: the store handle, the hub, the
// config, and the stop token are constructed once at startup and passed to
// every component. `Pipeline::start`/`stop` are both idempotent; stop
// cancels the token and waits for every loop to exit its current iteration.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::candles::CandleAggregator;
use crate::config::Config;
use crate::feed::{EventSink, FeedClient};
use crate::hub::{BroadcastHub, StreamMessage};
use crate::spot::SpotPriceFetcher;
use crate::storage::MarketStore;
use crate::types::{Ticker, Trade};

/// Shared handles for the whole service. One instance, no globals.
pub struct PipelineContext {
    pub config: Config,
    pub store: Arc<dyn MarketStore>,
    pub hub: Arc<BroadcastHub>,
    feed_connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl PipelineContext {
    pub fn new(config: Config, store: Arc<dyn MarketStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            config,
            store,
            hub,
            feed_connected: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the upstream feed connection is currently streaming.
    pub fn is_feed_connected(&self) -> bool {
        self.feed_connected.load(Ordering::SeqCst)
    }
}

/// Persistence + broadcast consumer for decoded feed events.
///
/// A failed insert does not suppress the broadcast for the same event; the
/// error is returned so the feed client can log the dropped write.
struct PipelineSink {
    store: Arc<dyn MarketStore>,
    hub: Arc<BroadcastHub>,
}

#[async_trait]
impl EventSink for PipelineSink {
    async fn on_ticker(&self, ticker: &Ticker) -> Result<()> {
        let persisted = self.store.insert_ticker(ticker).await;
        self.hub.publish(&StreamMessage::Ticker(ticker.into()));
        persisted.map_err(Into::into)
    }

    async fn on_trade(&self, trade: &Trade) -> Result<()> {
        let persisted = self.store.insert_trade(trade).await;
        self.hub.publish(&StreamMessage::Trade(trade.into()));
        persisted.map_err(Into::into)
    }
}

/// Owns the three long-lived loops: feed client, candle aggregator, and the
/// spot-price poller.
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Pipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn all loops. Calling twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("pipeline already started");
            return;
        }
        let cfg = &self.ctx.config;

        let sink = Arc::new(PipelineSink {
            store: self.ctx.store.clone(),
            hub: self.ctx.hub.clone(),
        });
        let feed = FeedClient::new(
            cfg.ws_url.clone(),
            cfg.symbols.clone(),
            Duration::from_secs(cfg.reconnect_delay_secs),
            sink,
            self.ctx.feed_connected.clone(),
            self.ctx.cancel.clone(),
        );

        let aggregator = CandleAggregator::new(
            self.ctx.store.clone(),
            Duration::from_secs(cfg.candle_sweep_secs),
            cfg.candle_lookback_hours,
            self.ctx.cancel.clone(),
        );

        let spot = SpotPriceFetcher::new(
            cfg.rest_url.clone(),
            cfg.spot_bases.clone(),
            self.ctx.store.clone(),
            Duration::from_secs(cfg.spot_interval_secs),
            self.ctx.cancel.clone(),
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(async move { feed.run().await }));
        tasks.push(tokio::spawn(async move { aggregator.run().await }));
        tasks.push(tokio::spawn(async move { spot.run().await }));

        info!("pipeline started");
    }

    /// Signal every loop to stop and wait until all of them have exited.
    /// Calling twice (or before start) is a no-op.
    pub async fn stop(&self) {
        self.ctx.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "pipeline task ended abnormally");
            }
        }
        info!("pipeline stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
