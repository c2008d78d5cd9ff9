//! Real-time market-data ingestion core for a single futures trading pair.
//!
//! Maintains a synchronized limit order book from a REST snapshot plus the
//! incremental depth stream, and computes persistent directional-pressure
//! signals (BUY / SELL, with STRONG variants) confirmed by aggregate
//! trade flow.
//!
//! Entry point: [`engine::PressureEngine`].

pub mod binance; // Futures REST client
pub mod book; // Ladder store, sequence gate, synchronizer, depth stream
pub mod config; // Engine parameters and validation
pub mod engine; // Task wiring and public entry point
pub mod error; // Error classification
pub mod signal; // Buckets, volatility, trade flow, detector
pub mod supervisor; // Transport state machine and staleness watchdog

pub use config::EngineConfig;
pub use engine::{EngineHandle, PressureEngine};
pub use error::{FeedError, Result};
pub use signal::types::{Signal, SignalKind};
