//! Binance USD-M futures REST integration
//!
//! Thin client over the public market-data endpoints the engine needs:
//! the 1000-level depth snapshot and one-minute klines. WebSocket streams
//! live next to their consumers in `book::websocket` and `signal::trades`.

pub mod client;
pub mod limiter;
pub mod types;

pub use client::{FuturesRestClient, SnapshotSource};
pub use types::{Candle, DepthSnapshot};
