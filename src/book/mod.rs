//! Order book synchronization
//!
//! Rebuilds the futures limit order book from a REST snapshot plus the
//! incremental depth stream, enforcing update-sequence continuity:
//! - Ladder store: sorted bid/ask price maps with zero-quantity removal
//! - Sequence gate: pu/U/u contiguity and bridging classification
//! - Synchronizer: snapshot + diff orchestration, invariant checks, recovery

pub mod ladder;
pub mod sequence;
pub mod synchronizer;
pub mod types;
pub mod websocket;

pub use ladder::Ladder;
pub use sequence::{classify, DiffAction};
pub use synchronizer::{BookObserver, OrderBookSynchronizer, SyncOutcome};
pub use types::{BookState, BookStats, DepthDiff, PriceLevel, Side};
pub use websocket::DepthStreamClient;
