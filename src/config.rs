//! Engine configuration
//!
//! All signal thresholds and timing parameters are explicit; the only
//! defaults are the documented production values. Validation runs once at
//! `start()` and never at steady state.

use crate::error::{FeedError, Result};

/// Configuration for a single-symbol pressure engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Futures trading pair (uppercased on use, e.g. "BTCUSDT")
    pub symbol: String,

    /// Consecutive candidate samples required before a signal may emit
    pub persist_samples: u32,

    /// Bid-volume growth ratio that makes a bucket a buy candidate
    pub buy_rate: f64,

    /// Ask-volume decay ratio required alongside `buy_rate`
    pub ask_drop: f64,

    /// Ask-volume growth ratio that makes a bucket a sell candidate
    pub sell_rate: f64,

    /// Bid-volume decay ratio required alongside `sell_rate`
    pub bid_drop: f64,

    /// Trade confirmation lookback window in seconds
    pub confirm_window_sec: u64,

    /// Minimum traded-volume growth ratio confirming a candidate
    pub confirm_trade_rate: f64,

    /// Capacity of every per-bucket resting/trade history ring
    pub max_buffer_size: usize,

    /// Dynamic window bounds and shape
    pub window_min: usize,
    pub window_max: usize,
    pub window_base: usize,
    pub window_gamma: f64,

    /// Book staleness threshold before the watchdog pauses trading
    pub staleness_threshold_ms: u64,

    /// Volatility estimator refresh period in seconds
    pub vol_refresh_sec: u64,

    /// Number of one-minute candles per volatility estimate
    pub vol_candles: u32,

    /// Multiplier applied to the averaged (high-low)/close ratio
    pub vol_scale: f64,

    /// REST depth snapshot limit (levels per side)
    pub depth_limit: u32,
}

impl EngineConfig {
    /// Production parameter set for the given symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            persist_samples: 2,
            buy_rate: 1.4,
            ask_drop: 0.7,
            sell_rate: 1.4,
            bid_drop: 0.7,
            confirm_window_sec: 45,
            confirm_trade_rate: 1.2,
            max_buffer_size: 200,
            window_min: 4,
            window_max: 40,
            window_base: 10,
            window_gamma: 0.8,
            staleness_threshold_ms: 500,
            vol_refresh_sec: 1800,
            vol_candles: 100,
            vol_scale: 0.1,
            depth_limit: 1000,
        }
    }

    /// Validate the configuration. Called once from `start()`; a failure
    /// here is fatal and never recovered.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(FeedError::Config("symbol must not be empty".into()));
        }
        if self.persist_samples == 0 {
            return Err(FeedError::Config("persist_samples must be >= 1".into()));
        }
        if self.buy_rate <= 1.0 || self.sell_rate <= 1.0 {
            return Err(FeedError::Config(
                "buy_rate and sell_rate must be > 1.0".into(),
            ));
        }
        for drop in [self.ask_drop, self.bid_drop] {
            if drop <= 0.0 || drop >= 1.0 {
                return Err(FeedError::Config(
                    "ask_drop and bid_drop must be in (0, 1)".into(),
                ));
            }
        }
        if self.confirm_window_sec == 0 {
            return Err(FeedError::Config("confirm_window_sec must be >= 1".into()));
        }
        if self.confirm_trade_rate <= 0.0 {
            return Err(FeedError::Config("confirm_trade_rate must be > 0".into()));
        }
        if self.max_buffer_size < 2 {
            return Err(FeedError::Config("max_buffer_size must be >= 2".into()));
        }
        if self.window_min < 2
            || self.window_min > self.window_max
            || self.window_max > self.max_buffer_size
        {
            return Err(FeedError::Config(
                "window bounds must satisfy 2 <= window_min <= window_max <= max_buffer_size"
                    .into(),
            ));
        }
        if self.window_base < self.window_min || self.window_base > self.window_max {
            return Err(FeedError::Config(
                "window_base must lie within [window_min, window_max]".into(),
            ));
        }
        if self.window_gamma <= 0.0 {
            return Err(FeedError::Config("window_gamma must be > 0".into()));
        }
        if self.staleness_threshold_ms == 0 {
            return Err(FeedError::Config(
                "staleness_threshold_ms must be >= 1".into(),
            ));
        }
        if self.vol_refresh_sec == 0 || self.vol_candles == 0 {
            return Err(FeedError::Config(
                "vol_refresh_sec and vol_candles must be >= 1".into(),
            ));
        }
        if self.vol_scale <= 0.0 {
            return Err(FeedError::Config("vol_scale must be > 0".into()));
        }
        if self.depth_limit == 0 || self.depth_limit > 1000 {
            return Err(FeedError::Config(
                "depth_limit must be in [1, 1000]".into(),
            ));
        }
        Ok(())
    }
}
