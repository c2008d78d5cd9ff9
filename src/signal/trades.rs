//! Trade classification and per-bucket time windows
//!
//! Consumes the aggregate-trade stream, classifies each trade as buyer-
//! or seller-initiated, and routes it into the side-specific deque of its
//! price bucket. Deques are pruned to the confirmation window on every
//! touch, so memory is bounded by trade rate, not uptime. The aggTrade
//! task is the only writer; the detector reads window sums through the
//! same lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::signal::types::{scale_price, BucketSnapshot};

/// Aggregated trade event from the futures `<symbol>@aggTrade` stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,

    #[serde(rename = "E")]
    pub event_time: i64,

    #[serde(rename = "s")]
    pub symbol: String,

    #[serde(rename = "a")]
    pub agg_trade_id: u64,

    #[serde(rename = "p")]
    pub price: String,

    #[serde(rename = "q")]
    pub quantity: String,

    #[serde(rename = "f")]
    pub first_trade_id: u64,

    #[serde(rename = "l")]
    pub last_trade_id: u64,

    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Buyer is the maker: true means the aggressor sold
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    BuyerInitiated,
    SellerInitiated,
}

impl AggTradeEvent {
    pub fn side(&self) -> TradeSide {
        if self.is_buyer_maker {
            TradeSide::SellerInitiated
        } else {
            TradeSide::BuyerInitiated
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TradeEntry {
    timestamp_sec: i64,
    qty: f64,
}

#[derive(Debug, Default)]
struct SideWindows {
    buys: VecDeque<TradeEntry>,
    sells: VecDeque<TradeEntry>,
}

impl SideWindows {
    fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }

    fn prune(&mut self, cutoff_sec: i64) {
        while self.buys.front().is_some_and(|e| e.timestamp_sec <= cutoff_sec) {
            self.buys.pop_front();
        }
        while self.sells.front().is_some_and(|e| e.timestamp_sec <= cutoff_sec) {
            self.sells.pop_front();
        }
    }

    fn push(&mut self, side: TradeSide, entry: TradeEntry) {
        match side {
            TradeSide::BuyerInitiated => self.buys.push_back(entry),
            TradeSide::SellerInitiated => self.sells.push_back(entry),
        }
    }
}

#[derive(Debug, Default)]
struct RouterInner {
    step_scaled: i64,
    buckets: HashMap<i64, SideWindows>,
    /// Trades whose price maps to no known bucket; diagnostic only
    fallback: SideWindows,
}

/// Per-bucket trade flow windows keyed by scaled bucket start price.
pub struct TradeRouter {
    confirm_window_sec: i64,
    inner: Mutex<RouterInner>,
}

impl TradeRouter {
    pub fn new(confirm_window_sec: u64) -> Self {
        Self {
            confirm_window_sec: confirm_window_sec as i64,
            inner: Mutex::new(RouterInner::default()),
        }
    }

    fn now_sec() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Adopt the bucket keyset of a fresh aggregation: create windows for
    /// new buckets, evict windows that left the ladder span and drained.
    pub fn sync_buckets(&self, snapshot: &BucketSnapshot) {
        let mut inner = self.inner.lock();
        inner.step_scaled = snapshot.step_scaled;

        for key in snapshot.keys() {
            inner.buckets.entry(key).or_default();
        }

        let cutoff = Self::now_sec() - self.confirm_window_sec;
        let current: std::collections::HashSet<i64> = snapshot.keys().collect();
        inner.buckets.retain(|key, windows| {
            if current.contains(key) {
                return true;
            }
            windows.prune(cutoff);
            !windows.is_empty()
        });
    }

    /// Classify and enqueue one trade.
    pub fn record(&self, trade: &AggTradeEvent) -> Result<()> {
        let price: f64 = trade
            .price
            .parse()
            .map_err(|e| FeedError::Parse(format!("trade price {:?}: {}", trade.price, e)))?;
        let qty: f64 = trade
            .quantity
            .parse()
            .map_err(|e| FeedError::Parse(format!("trade qty {:?}: {}", trade.quantity, e)))?;

        let entry = TradeEntry {
            timestamp_sec: trade.trade_time / 1000,
            qty,
        };
        let side = trade.side();
        let cutoff = entry.timestamp_sec - self.confirm_window_sec;

        let mut inner = self.inner.lock();
        let step = inner.step_scaled;
        if step > 0 {
            let key = scale_price(price).div_euclid(step) * step;
            if let Some(windows) = inner.buckets.get_mut(&key) {
                windows.prune(cutoff);
                windows.push(side, entry);
                return Ok(());
            }
            debug!(key, price, "Trade outside known buckets, using fallback");
        }

        inner.fallback.prune(cutoff);
        inner.fallback.push(side, entry);
        Ok(())
    }

    /// Windowed buyer-initiated volume for the bucket at `key`, with the
    /// nearest-key fallback (distance <= step/2) tolerating bucket-step
    /// drift between snapshots.
    pub fn recent_buy_volume(&self, key: i64) -> f64 {
        self.recent_volume(key, TradeSide::BuyerInitiated)
    }

    /// Windowed seller-initiated volume for the bucket at `key`.
    pub fn recent_sell_volume(&self, key: i64) -> f64 {
        self.recent_volume(key, TradeSide::SellerInitiated)
    }

    fn recent_volume(&self, key: i64, side: TradeSide) -> f64 {
        let cutoff = Self::now_sec() - self.confirm_window_sec;
        let mut inner = self.inner.lock();
        let step = inner.step_scaled;

        let lookup_key = if inner.buckets.contains_key(&key) {
            Some(key)
        } else {
            // Nearest stored key, accepted within half a bucket step.
            inner
                .buckets
                .keys()
                .map(|k| (*k, (*k - key).abs()))
                .min_by_key(|&(_, dist)| dist)
                .filter(|&(_, dist)| dist * 2 <= step)
                .map(|(k, _)| k)
        };

        let Some(lookup_key) = lookup_key else {
            return 0.0;
        };
        let Some(windows) = inner.buckets.get_mut(&lookup_key) else {
            return 0.0;
        };
        windows.prune(cutoff);
        let deque = match side {
            TradeSide::BuyerInitiated => &windows.buys,
            TradeSide::SellerInitiated => &windows.sells,
        };
        deque.iter().map(|e| e.qty).sum()
    }

    /// True when the bucket still holds unexpired trades.
    pub fn has_entries(&self, key: i64) -> bool {
        let cutoff = Self::now_sec() - self.confirm_window_sec;
        let mut inner = self.inner.lock();
        match inner.buckets.get_mut(&key) {
            Some(windows) => {
                windows.prune(cutoff);
                !windows.is_empty()
            }
            None => false,
        }
    }

    /// Depth of the misrouted-trade deque, for diagnostics.
    pub fn fallback_depth(&self) -> usize {
        let cutoff = Self::now_sec() - self.confirm_window_sec;
        let mut inner = self.inner.lock();
        inner.fallback.prune(cutoff);
        inner.fallback.buys.len() + inner.fallback.sells.len()
    }
}
