//! Order book data structures and wire types.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;

use crate::book::ladder::Ladder;
use crate::error::{FeedError, Result};

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

/// One resting level. Quantity is always positive; zero-quantity updates
/// remove the level on ingest and are never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Incremental depth update from the futures `<symbol>@depth@100ms` stream.
///
/// Identified by the (U, u, pu) update-id triple; `pu` is the previous
/// event's `u` and drives the strict futures contiguity rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthDiff {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "U")]
    pub first_update_id: u64,

    #[serde(rename = "u")]
    pub final_update_id: u64,

    #[serde(rename = "pu")]
    pub prev_final_update_id: u64,

    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>, // [price, qty]

    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>, // [price, qty]
}

/// Parse one [price, qty] pair from the wire. A negative quantity is an
/// invariant violation, not a removal.
pub fn parse_level(pair: &[String; 2]) -> Result<(Decimal, Decimal)> {
    let price = Decimal::from_str(&pair[0])
        .map_err(|e| FeedError::Parse(format!("invalid price {:?}: {}", pair[0], e)))?;
    let qty = Decimal::from_str(&pair[1])
        .map_err(|e| FeedError::Parse(format!("invalid qty {:?}: {}", pair[1], e)))?;
    if qty.is_sign_negative() {
        return Err(FeedError::Parse(format!("negative quantity {}", qty)));
    }
    Ok((price, qty))
}

/// Immutable view of the synchronized book, handed to observers after
/// every applied diff. The synchronizer is the only writer.
#[derive(Debug, Clone)]
pub struct BookState {
    /// Trading pair symbol (uppercase)
    pub symbol: String,

    /// Sorted bid/ask ladder
    pub ladder: Ladder,

    /// Sequence number of the last applied diff (or snapshot)
    pub last_update_id: u64,

    /// Exchange event time of the last applied diff (ms since epoch)
    pub event_time_ms: i64,

    /// Monotonic instant of the last successful apply, for staleness checks
    pub applied_at: Instant,
}

impl BookState {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            ladder: Ladder::new(),
            last_update_id: 0,
            event_time_ms: 0,
            applied_at: Instant::now(),
        }
    }

    /// Top `k` levels per side, best first.
    pub fn depth_summary(&self, k: usize) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        (self.ladder.top_k(Side::Bid, k), self.ladder.top_k(Side::Ask, k))
    }

    /// Mid price, falling back to the single populated side.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.ladder.best(Side::Bid), self.ladder.best(Side::Ask)) {
            (Some(b), Some(a)) => Some((b.price + a.price) / Decimal::TWO),
            (Some(b), None) => Some(b.price),
            (None, Some(a)) => Some(a.price),
            (None, None) => None,
        }
    }
}

/// Book statistics, the observability surface mirrored from the
/// synchronizer counters.
#[derive(Debug, Clone, Serialize)]
pub struct BookStats {
    pub symbol: String,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub total_bid_volume: Decimal,
    pub total_ask_volume: Decimal,
    pub spread: Option<Decimal>,
    pub spread_pct: Option<f64>,
    pub last_update_id: u64,
    pub applied_updates: u64,
    pub rest_snapshots: u64,
}

impl BookStats {
    pub fn from_book(book: &BookState, applied_updates: u64, rest_snapshots: u64) -> Self {
        let best_bid = book.ladder.best(Side::Bid);
        let best_ask = book.ladder.best(Side::Ask);

        let spread = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        };
        let spread_pct = match (spread, best_ask) {
            (Some(s), Some(a)) if !a.price.is_zero() => {
                (s / a.price * Decimal::ONE_HUNDRED).to_f64()
            }
            _ => None,
        };

        Self {
            symbol: book.symbol.clone(),
            bid_levels: book.ladder.level_count(Side::Bid),
            ask_levels: book.ladder.level_count(Side::Ask),
            total_bid_volume: book.ladder.total_volume(Side::Bid),
            total_ask_volume: book.ladder.total_volume(Side::Ask),
            spread,
            spread_pct,
            last_update_id: book.last_update_id,
            applied_updates,
            rest_snapshots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_diff_deserialization() {
        let json = r#"{
            "e": "depthUpdate",
            "E": 1699999999123,
            "s": "BTCUSDT",
            "U": 1000,
            "u": 1005,
            "pu": 999,
            "b": [["67650.00", "1.23400"], ["67649.50", "0"]],
            "a": [["67651.00", "0.98700"]]
        }"#;

        let diff: DepthDiff = serde_json::from_str(json).unwrap();
        assert_eq!(diff.event_type, "depthUpdate");
        assert_eq!(diff.first_update_id, 1000);
        assert_eq!(diff.final_update_id, 1005);
        assert_eq!(diff.prev_final_update_id, 999);
        assert_eq!(diff.bids.len(), 2);
        assert_eq!(diff.bids[1][1], "0");
    }

    #[test]
    fn test_parse_level_rejects_negative_qty() {
        let pair = ["100.0".to_string(), "-1.0".to_string()];
        assert!(matches!(parse_level(&pair), Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_parse_level_rejects_garbage() {
        let pair = ["not-a-price".to_string(), "1.0".to_string()];
        assert!(parse_level(&pair).is_err());
    }

    #[test]
    fn test_mid_price_single_side() {
        let mut book = BookState::new("BTCUSDT".into());
        book.ladder.apply_level(
            Side::Bid,
            Decimal::from_str("100").unwrap(),
            Decimal::ONE,
        );
        assert_eq!(book.mid_price(), Some(Decimal::from_str("100").unwrap()));
    }

    #[test]
    fn test_depth_summary_orders_and_truncates() {
        let mut book = BookState::new("BTCUSDT".into());
        for (p, q) in [("99.0", "1.0"), ("100.0", "2.0"), ("98.0", "3.0")] {
            book.ladder.apply_level(
                Side::Bid,
                Decimal::from_str(p).unwrap(),
                Decimal::from_str(q).unwrap(),
            );
        }
        for (p, q) in [("101.0", "4.0"), ("102.0", "5.0")] {
            book.ladder.apply_level(
                Side::Ask,
                Decimal::from_str(p).unwrap(),
                Decimal::from_str(q).unwrap(),
            );
        }

        let (bids, asks) = book.depth_summary(2);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, Decimal::from_str("100.0").unwrap());
        assert_eq!(bids[1].price, Decimal::from_str("99.0").unwrap());
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[0].price, Decimal::from_str("101.0").unwrap());
        assert_eq!(asks[0].qty, Decimal::from_str("4.0").unwrap());
    }
}
