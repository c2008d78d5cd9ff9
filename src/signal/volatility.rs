//! Volatility-derived bucket width
//!
//! Every refresh period the estimator pulls recent one-minute candles and
//! publishes `mean((high - low) / close) * vol_scale` as the bucket-width
//! ratio. Candles with close <= 0 are rejected; a failed fetch or an
//! all-invalid batch keeps the previous value. Readers see the ratio
//! through a single atomic load.

use rust_decimal::prelude::ToPrimitive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::binance::{Candle, SnapshotSource};

pub struct VolatilityEstimator {
    symbol: String,
    scale: f64,
    candles: u32,
    ratio_bits: AtomicU64,
}

impl VolatilityEstimator {
    pub fn new(symbol: &str, scale: f64, candles: u32) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            scale,
            candles,
            ratio_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Latest published ratio; 0.0 until the first successful refresh.
    pub fn current_ratio(&self) -> f64 {
        f64::from_bits(self.ratio_bits.load(Ordering::Acquire))
    }

    /// Fetch candles and republish. Keeps the previous value on any
    /// failure; there is no fabricated data.
    pub async fn refresh(&self, source: &dyn SnapshotSource) {
        match source.minute_klines(&self.symbol, self.candles).await {
            Ok(candles) => match compute_ratio(&candles, self.scale) {
                Some(ratio) => {
                    self.ratio_bits.store(ratio.to_bits(), Ordering::Release);
                    info!(
                        symbol = %self.symbol,
                        ratio,
                        candles = candles.len(),
                        "Published volatility ratio"
                    );
                }
                None => warn!(
                    symbol = %self.symbol,
                    "No valid candles in batch, keeping previous ratio"
                ),
            },
            Err(e) => warn!(
                symbol = %self.symbol,
                error = %e,
                "Kline fetch failed, keeping previous ratio"
            ),
        }
    }

    /// Periodic refresh task; runs until cancelled.
    pub async fn run(
        self: Arc<Self>,
        source: Arc<dyn SnapshotSource>,
        refresh_period: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(refresh_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.refresh(source.as_ref()).await,
            }
        }
        debug!(symbol = %self.symbol, "Volatility task stopped");
    }
}

/// Average `(high - low) / close` over candles with close > 0, scaled.
/// None when no candle qualifies.
pub fn compute_ratio(candles: &[Candle], scale: f64) -> Option<f64> {
    let mut sum = 0.0;
    let mut valid = 0u32;

    for candle in candles {
        if candle.close <= rust_decimal::Decimal::ZERO {
            continue;
        }
        let (Some(high), Some(low), Some(close)) = (
            candle.high.to_f64(),
            candle.low.to_f64(),
            candle.close.to_f64(),
        ) else {
            continue;
        };
        sum += (high - low) / close;
        valid += 1;
    }

    (valid > 0).then(|| (sum / valid as f64) * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn candle(high: &str, low: &str, close: &str) -> Candle {
        Candle {
            high: Decimal::from_str(high).unwrap(),
            low: Decimal::from_str(low).unwrap(),
            close: Decimal::from_str(close).unwrap(),
        }
    }

    #[test]
    fn test_compute_ratio_averages_valid_candles() {
        let candles = vec![
            candle("110", "100", "100"), // range ratio 0.10
            candle("105", "100", "100"), // range ratio 0.05
        ];
        let ratio = compute_ratio(&candles, 0.1).unwrap();
        assert!((ratio - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn test_compute_ratio_rejects_zero_close() {
        let candles = vec![
            candle("110", "100", "0"),
            candle("105", "95", "100"), // only valid one, ratio 0.10
        ];
        let ratio = compute_ratio(&candles, 0.1).unwrap();
        assert!((ratio - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_all_candles_invalid_keeps_previous() {
        let candles: Vec<Candle> = (0..100).map(|_| candle("110", "100", "0")).collect();
        assert!(compute_ratio(&candles, 0.1).is_none());

        let estimator = VolatilityEstimator::new("BTCUSDT", 0.1, 100);
        // A refresh that produced no ratio leaves the atomic untouched.
        assert_eq!(estimator.current_ratio(), 0.0);
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_on_fetch_failure() {
        use crate::binance::DepthSnapshot;
        use crate::error::{FeedError, Result};
        use async_trait::async_trait;

        struct FailingSource;

        #[async_trait]
        impl SnapshotSource for FailingSource {
            async fn depth_snapshot(&self, _: &str, _: u32) -> Result<DepthSnapshot> {
                Err(FeedError::Connection("down".into()))
            }
            async fn minute_klines(&self, _: &str, _: u32) -> Result<Vec<Candle>> {
                Err(FeedError::Connection("down".into()))
            }
        }

        let estimator = VolatilityEstimator::new("BTCUSDT", 0.1, 100);
        estimator
            .ratio_bits
            .store(0.002f64.to_bits(), Ordering::Release);

        estimator.refresh(&FailingSource).await;
        assert_eq!(estimator.current_ratio(), 0.002);
    }
}
