//! External USD price sources

use crate::games::types::Currency;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

pub const DEFAULT_COINGECKO_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

#[derive(Debug, Clone, thiserror::Error)]
pub enum PriceFetchError {
    #[error("Rate limited by price source")]
    RateLimited,

    #[error("Price source returned HTTP {0}")]
    Status(u16),

    #[error("Price request failed: {0}")]
    Request(String),

    #[error("No USD price for {0} in response")]
    MissingPrice(Currency),
}

impl PriceFetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PriceFetchError::RateLimited)
    }
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current USD price of one unit of `currency`
    async fn fetch_usd_price(&self, currency: Currency) -> Result<f64, PriceFetchError>;
}

#[derive(Debug, Deserialize)]
struct SimplePriceData {
    usd: Option<f64>,
}

/// CoinGecko `/simple/price` client
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PriceFetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crashline/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PriceFetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    fn name(&self) -> &str {
        "coingecko"
    }

    async fn fetch_usd_price(&self, currency: Currency) -> Result<f64, PriceFetchError> {
        let coin_id = currency.coingecko_id();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("ids", coin_id), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| PriceFetchError::Request(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceFetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(PriceFetchError::Status(status.as_u16()));
        }

        let body: HashMap<String, SimplePriceData> = response
            .json()
            .await
            .map_err(|e| PriceFetchError::Request(e.to_string()))?;

        body.get(coin_id)
            .and_then(|data| data.usd)
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or(PriceFetchError::MissingPrice(currency))
    }
}
