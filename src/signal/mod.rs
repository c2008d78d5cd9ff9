//! Directional-pressure signal engine
//!
//! Partitions the synchronized ladder into volatility-sized price buckets,
//! tracks per-bucket resting liquidity and directional traded volume, and
//! emits BUY/SELL (plus STRONG variants) when rate-of-change conditions
//! persist across samples and are confirmed by real trade flow.

pub mod buckets;
pub mod detector;
pub mod trade_stream;
pub mod trades;
pub mod types;
pub mod volatility;

pub use buckets::aggregate;
pub use detector::SignalDetector;
pub use trade_stream::TradeStreamClient;
pub use trades::{AggTradeEvent, TradeRouter, TradeSide};
pub use types::{BucketSnapshot, BucketVolume, Signal, SignalKind, PRICE_SCALE};
pub use volatility::VolatilityEstimator;
