//! Binance USD-M futures HTTP client
//!
//! Wraps reqwest::Client with the base URL, timeout, and user-agent the
//! engine uses for its two REST calls: the depth snapshot and the
//! one-minute klines feeding the volatility estimator.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::binance::limiter::RestThrottle;
use crate::binance::types::{Candle, DepthSnapshot};
use crate::error::{FeedError, Result};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Source of REST market data. The synchronizer and the volatility
/// estimator depend on this seam rather than on the concrete client so
/// tests can drive them with canned responses.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the depth snapshot for `symbol` with up to `limit` levels per side.
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot>;

    /// Fetch the most recent `limit` one-minute candles for `symbol`.
    async fn minute_klines(&self, symbol: &str, limit: u32) -> Result<Vec<Candle>>;
}

/// REST client for the public futures market-data endpoints.
pub struct FuturesRestClient {
    client: Client,
    base_url: String,
    throttle: RestThrottle,
}

impl std::fmt::Debug for FuturesRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl FuturesRestClient {
    /// Create a client with default settings.
    ///
    /// - Base URL: https://fapi.binance.com
    /// - Timeout: 10 seconds
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against a custom base URL (test servers).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("lob-pressure/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            throttle: RestThrottle::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn acquire_permit(&self) -> Result<()> {
        self.throttle
            .acquire()
            .await
            .map_err(|e| FeedError::RateLimit(e.to_string()))
    }
}

#[async_trait]
impl SnapshotSource for FuturesRestClient {
    async fn depth_snapshot(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot> {
        self.acquire_permit().await?;

        let url = format!(
            "{}/fapi/v1/depth?symbol={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            limit
        );
        debug!(symbol = %symbol, limit, "Fetching depth snapshot");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::from(response.error_for_status().unwrap_err()));
        }

        let snapshot: DepthSnapshot = response.json().await?;
        debug!(
            symbol = %symbol,
            last_update_id = snapshot.last_update_id,
            bid_levels = snapshot.bids.len(),
            ask_levels = snapshot.asks.len(),
            "Fetched depth snapshot"
        );
        Ok(snapshot)
    }

    async fn minute_klines(&self, symbol: &str, limit: u32) -> Result<Vec<Candle>> {
        self.acquire_permit().await?;

        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval=1m&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            limit
        );
        debug!(symbol = %symbol, limit, "Fetching 1m klines");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FeedError::from(response.error_for_status().unwrap_err()));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        rows.iter().map(|row| Candle::from_kline_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let client = FuturesRestClient::new().unwrap();
        assert_eq!(client.base_url(), "https://fapi.binance.com");
    }

    #[test]
    fn test_custom_base_url() {
        let client = FuturesRestClient::with_base_url("http://127.0.0.1:9001").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9001");
    }
}
