//! USD price lookups.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::common::error::{GoalSyncError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the latest USD price for an asset.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn usd_price(&self, asset_id: &str) -> Result<f64>;
}

/// `/simple/price` response: `{"solana": {"usd": 123.4}}`.
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
}

/// CoinGecko-compatible HTTP price source.
pub struct CoinGeckoPriceSource {
    client: Client,
    base_url: String,
}

impl CoinGeckoPriceSource {
    /// # Errors
    ///
    /// Returns [`GoalSyncError::HttpError`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn usd_price(&self, asset_id: &str) -> Result<f64> {
        let url = format!("{}/simple/price", self.base_url);
        let prices: HashMap<String, SimplePrice> = self
            .client
            .get(&url)
            .query(&[("ids", asset_id), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        prices
            .get(asset_id)
            .and_then(|price| price.usd)
            .ok_or_else(|| GoalSyncError::NotFound(format!("no USD price for '{asset_id}'")))
    }
}
