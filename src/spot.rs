// =============================================================================
// Spot Price Poller — REST exchange-rates peripheral
// =============================================================================
//
// Every `fetch_interval` the poller asks the exchange REST API for the USD
// rate of each configured base currency and stores it. Failures log and the
// loop continues; requests are paced 500 ms apart.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::MarketStore;

/// Pause between per-currency requests within one round.
const REQUEST_PACING: Duration = Duration::from_millis(500);

pub struct SpotPriceFetcher {
    client: reqwest::Client,
    rest_url: String,
    bases: Vec<String>,
    store: Arc<dyn MarketStore>,
    fetch_interval: Duration,
    cancel: CancellationToken,
}

impl SpotPriceFetcher {
    pub fn new(
        rest_url: String,
        bases: Vec<String>,
        store: Arc<dyn MarketStore>,
        fetch_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            rest_url,
            bases,
            store,
            fetch_interval,
            cancel,
        }
    }

    /// Run until the stop signal fires.
    pub async fn run(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            for base in &self.bases {
                match self.fetch_one(base).await {
                    Ok(rate) => debug!(base = %base, rate, "spot price stored"),
                    Err(e) => warn!(base = %base, error = %e, "spot price fetch failed"),
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        info!("spot price poller stopped");
                        return;
                    }
                    _ = tokio::time::sleep(REQUEST_PACING) => {}
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.fetch_interval) => {}
            }
        }
        info!("spot price poller stopped");
    }

    /// Fetch and store the USD rate for one base currency.
    async fn fetch_one(&self, base: &str) -> Result<f64> {
        let url = format!("{}/exchange-rates?currency={}", self.rest_url, base);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("exchange-rates request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("exchange-rates returned status {}", resp.status());
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("exchange-rates body was not valid JSON")?;

        let rate = body["data"]["rates"]["USD"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .context("exchange-rates response missing a numeric USD rate")?;

        self.store.insert_spot_price(base, "USD", rate).await?;
        Ok(rate)
    }
}
