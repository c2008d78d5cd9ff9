//! Sorted bid/ask ladder
//!
//! Two BTreeMaps keyed by Decimal price. Bids iterate descending, asks
//! ascending. The store never holds a zero-quantity level; the two-side
//! uncrossed invariant is checked by the synchronizer, not here.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::book::types::{PriceLevel, Side};

#[derive(Debug, Clone, Default)]
pub struct Ladder {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl Ladder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, overwrite, or remove (qty == 0) one level. O(log n).
    pub fn apply_level(&mut self, side: Side, price: Decimal, qty: Decimal) {
        let map = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if qty.is_zero() {
            map.remove(&price);
        } else {
            map.insert(price, qty);
        }
    }

    /// Atomic full rebuild from a REST snapshot. Zero-quantity entries in
    /// the snapshot are dropped on ingest.
    pub fn replace_all(
        &mut self,
        bids: impl IntoIterator<Item = (Decimal, Decimal)>,
        asks: impl IntoIterator<Item = (Decimal, Decimal)>,
    ) {
        self.bids = bids.into_iter().filter(|(_, q)| !q.is_zero()).collect();
        self.asks = asks.into_iter().filter(|(_, q)| !q.is_zero()).collect();
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Highest bid / lowest ask.
    pub fn best(&self, side: Side) -> Option<PriceLevel> {
        match side {
            Side::Bid => self
                .bids
                .iter()
                .next_back()
                .map(|(p, q)| PriceLevel { price: *p, qty: *q }),
            Side::Ask => self
                .asks
                .iter()
                .next()
                .map(|(p, q)| PriceLevel { price: *p, qty: *q }),
        }
    }

    /// Up to `k` best levels: bids descending, asks ascending.
    pub fn top_k(&self, side: Side, k: usize) -> Vec<PriceLevel> {
        match side {
            Side::Bid => self
                .bids
                .iter()
                .rev()
                .take(k)
                .map(|(p, q)| PriceLevel { price: *p, qty: *q })
                .collect(),
            Side::Ask => self
                .asks
                .iter()
                .take(k)
                .map(|(p, q)| PriceLevel { price: *p, qty: *q })
                .collect(),
        }
    }

    /// Bids in descending price order.
    pub fn iter_bids(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.bids.iter().rev().map(|(p, q)| (*p, *q))
    }

    /// Asks in ascending price order.
    pub fn iter_asks(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.asks.iter().map(|(p, q)| (*p, *q))
    }

    pub fn level_count(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// True when both sides are populated and best bid >= best ask.
    pub fn is_crossed(&self) -> bool {
        match (self.best(Side::Bid), self.best(Side::Ask)) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Sum of resident quantities on one side.
    pub fn total_volume(&self, side: Side) -> Decimal {
        match side {
            Side::Bid => self.bids.values().sum(),
            Side::Ask => self.asks.values().sum(),
        }
    }

    /// Sum of one side's quantities with price in [min_price, max_price].
    pub fn volume_in_range(&self, side: Side, min_price: Decimal, max_price: Decimal) -> Decimal {
        let map = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        map.range(min_price..=max_price).map(|(_, q)| *q).sum()
    }

    /// Global price span across both sides, None when the book is empty.
    pub fn price_span(&self) -> Option<(Decimal, Decimal)> {
        let mut lows = Vec::with_capacity(2);
        let mut highs = Vec::with_capacity(2);

        if let (Some((lo, _)), Some((hi, _))) =
            (self.bids.iter().next(), self.bids.iter().next_back())
        {
            lows.push(*lo);
            highs.push(*hi);
        }
        if let (Some((lo, _)), Some((hi, _))) =
            (self.asks.iter().next(), self.asks.iter().next_back())
        {
            lows.push(*lo);
            highs.push(*hi);
        }

        match (lows.into_iter().min(), highs.into_iter().max()) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }
}
