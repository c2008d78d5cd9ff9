//! Signal-side data types.

use serde::Serialize;

/// Fixed-point price scale: all bucket boundary math works on
/// `floor(price * PRICE_SCALE)` so equal prices compare equal and bucket
/// steps never suffer floating-point drift.
pub const PRICE_SCALE: i64 = 1000;

/// Scale a price into bucket coordinate space (truncating).
pub fn scale_price(price: f64) -> i64 {
    (price * PRICE_SCALE as f64) as i64
}

/// One price bucket of the current aggregation, keyed by its scaled start
/// price (`bucket_index * step_scaled`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketVolume {
    /// Scaled start price, the bucket's identity across snapshots
    pub key: i64,
    /// Interval [start, end) in price units
    pub start: f64,
    pub end: f64,
    /// Resting volume per side inside the interval
    pub bid_vol: f64,
    pub ask_vol: f64,
}

/// Bucketed view of one applied ladder snapshot; buckets are contiguous
/// and ordered by price.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub event_time_ms: i64,
    pub step_scaled: i64,
    pub buckets: Vec<BucketVolume>,
}

impl BucketSnapshot {
    pub fn keys(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets.iter().map(|b| b.key)
    }
}

/// Discrete pressure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Buy,
    StrongBuy,
    Sell,
    StrongSell,
}

impl SignalKind {
    pub fn is_buy(&self) -> bool {
        matches!(self, SignalKind::Buy | SignalKind::StrongBuy)
    }
}

/// Emitted signal with the ratios that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub timestamp_ms: i64,
    pub bid_rate: f64,
    pub ask_rate: f64,
    /// Resting volume of the signal side's last sample
    pub resting_vol: f64,
    /// Directional traded volume (bucket + adjacent bucket) this sample
    pub trade_vol_combined: f64,
}
