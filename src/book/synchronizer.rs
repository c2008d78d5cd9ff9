//! Order book synchronizer
//!
//! Owns the ladder and the last applied update id. The depth task is the
//! only writer; observers receive an immutable `BookState` after every
//! successfully applied diff. Transport orchestration (WS-before-snapshot
//! boot, watchdog, reconnect) lives in `engine`; this type holds the
//! sequencing and invariant logic so it can be driven directly in tests.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::binance::{DepthSnapshot, SnapshotSource};
use crate::book::ladder::Ladder;
use crate::book::sequence::{classify, DiffAction};
use crate::book::types::{parse_level, BookState, BookStats, DepthDiff, Side};
use crate::error::{FeedError, Result};

/// Sink invoked on the depth task after each applied diff. Errors are
/// logged and isolated; they never stop the apply loop.
pub trait BookObserver: Send {
    fn on_book_update(&mut self, book: &BookState) -> anyhow::Result<()>;
}

impl<F> BookObserver for F
where
    F: FnMut(&BookState) -> anyhow::Result<()> + Send,
{
    fn on_book_update(&mut self, book: &BookState) -> anyhow::Result<()> {
        self(book)
    }
}

/// Result of feeding one diff through the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    Skipped,
    /// Sequence gap or invariant violation: the ladder was invalidated and
    /// a fresh REST snapshot is required before any further diff applies.
    NeedsResnapshot,
}

/// Structured invariant diagnostics for the current ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum LadderViolation {
    CrossedBook { best_bid: Decimal, best_ask: Decimal },
}

pub struct OrderBookSynchronizer {
    book: BookState,
    observers: Vec<Box<dyn BookObserver>>,
    applied_updates: u64,
    rest_snapshots: u64,
    /// Set after a gap until the next snapshot lands
    invalidated: bool,
}

impl OrderBookSynchronizer {
    pub fn new(symbol: &str) -> Self {
        Self {
            book: BookState::new(symbol.to_uppercase()),
            observers: Vec::new(),
            applied_updates: 0,
            rest_snapshots: 0,
            invalidated: true,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.book.symbol
    }

    /// Register a sink invoked after every successfully applied diff.
    pub fn subscribe(&mut self, observer: Box<dyn BookObserver>) {
        self.observers.push(observer);
    }

    /// Immutable copy of the current book for consumers.
    pub fn current_snapshot(&self) -> BookState {
        self.book.clone()
    }

    pub fn last_update_id(&self) -> u64 {
        self.book.last_update_id
    }

    pub fn last_applied_at(&self) -> Option<Instant> {
        (self.applied_updates > 0 || self.rest_snapshots > 0).then_some(self.book.applied_at)
    }

    /// True when a gap or invariant violation has been seen and no fresh
    /// snapshot has replaced the ladder yet.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn stats(&self) -> BookStats {
        BookStats::from_book(&self.book, self.applied_updates, self.rest_snapshots)
    }

    /// Invariant diagnostics over the resident ladder.
    pub fn violations(&self) -> Vec<LadderViolation> {
        let mut out = Vec::new();
        if let (Some(bid), Some(ask)) = (
            self.book.ladder.best(Side::Bid),
            self.book.ladder.best(Side::Ask),
        ) {
            if bid.price >= ask.price {
                out.push(LadderViolation::CrossedBook {
                    best_bid: bid.price,
                    best_ask: ask.price,
                });
            }
        }
        out
    }

    /// Rebuild the ladder from a REST snapshot and re-enter bridging mode:
    /// the next applied diff is selected by the U <= lastUpdateId <= u rule.
    pub fn apply_snapshot(&mut self, snapshot: &DepthSnapshot) -> Result<()> {
        let parse_side = |levels: &[(String, String)]| -> Result<Vec<(Decimal, Decimal)>> {
            levels
                .iter()
                .map(|(p, q)| {
                    let price = Decimal::from_str(p)
                        .map_err(|e| FeedError::Parse(format!("snapshot price {:?}: {}", p, e)))?;
                    let qty = Decimal::from_str(q)
                        .map_err(|e| FeedError::Parse(format!("snapshot qty {:?}: {}", q, e)))?;
                    Ok((price, qty))
                })
                .collect()
        };

        let bids = parse_side(&snapshot.bids)?;
        let asks = parse_side(&snapshot.asks)?;

        self.book.ladder.replace_all(bids, asks);
        self.book.last_update_id = snapshot.last_update_id;
        self.book.applied_at = Instant::now();
        self.rest_snapshots += 1;
        self.invalidated = false;

        if self.book.ladder.is_crossed() {
            // A crossed snapshot means the venue handed us garbage; treat
            // it like any other invariant violation.
            self.book.ladder.clear();
            self.invalidated = true;
            return Err(FeedError::OutOfSync(
                "crossed book in REST snapshot".to_string(),
            ));
        }

        info!(
            symbol = %self.book.symbol,
            last_update_id = snapshot.last_update_id,
            bid_levels = self.book.ladder.level_count(Side::Bid),
            ask_levels = self.book.ladder.level_count(Side::Ask),
            "Order book rebuilt from snapshot"
        );
        Ok(())
    }

    /// Fetch a fresh snapshot through `source` and rebuild the ladder.
    pub async fn resync(&mut self, source: &dyn SnapshotSource, limit: u32) -> Result<()> {
        info!(symbol = %self.book.symbol, "Resyncing order book from REST");
        let snapshot = source.depth_snapshot(&self.book.symbol, limit).await?;
        self.apply_snapshot(&snapshot)
    }

    /// Feed one diff through the sequence gate and, when applicable, the
    /// ladder. Parse failures leave the book untouched (caller logs and
    /// skips); gaps and invariant violations invalidate the ladder.
    pub fn handle_diff(&mut self, diff: &DepthDiff) -> Result<SyncOutcome> {
        if self.invalidated {
            return Ok(SyncOutcome::NeedsResnapshot);
        }

        match classify(diff, self.book.last_update_id) {
            DiffAction::Skip => {
                debug!(
                    symbol = %self.book.symbol,
                    u = diff.final_update_id,
                    last_update_id = self.book.last_update_id,
                    "Ignoring stale depth diff"
                );
                Ok(SyncOutcome::Skipped)
            }
            DiffAction::Resnapshot => {
                warn!(
                    symbol = %self.book.symbol,
                    U = diff.first_update_id,
                    u = diff.final_update_id,
                    pu = diff.prev_final_update_id,
                    last_update_id = self.book.last_update_id,
                    "Gap in depth stream, snapshot required"
                );
                self.invalidated = true;
                Ok(SyncOutcome::NeedsResnapshot)
            }
            DiffAction::Apply => self.apply_diff(diff),
        }
    }

    fn apply_diff(&mut self, diff: &DepthDiff) -> Result<SyncOutcome> {
        // Parse everything up front so a malformed level leaves the ladder
        // untouched and the diff can be skipped as a unit.
        let mut bids = Vec::with_capacity(diff.bids.len());
        for pair in &diff.bids {
            bids.push(parse_level(pair)?);
        }
        let mut asks = Vec::with_capacity(diff.asks.len());
        for pair in &diff.asks {
            asks.push(parse_level(pair)?);
        }

        for (price, qty) in bids {
            self.book.ladder.apply_level(Side::Bid, price, qty);
        }
        for (price, qty) in asks {
            self.book.ladder.apply_level(Side::Ask, price, qty);
        }

        if self.book.ladder.is_crossed() {
            let violations = self.violations();
            error!(
                symbol = %self.book.symbol,
                ?violations,
                "Crossed book after diff, dropping ladder"
            );
            self.book.ladder.clear();
            self.invalidated = true;
            return Ok(SyncOutcome::NeedsResnapshot);
        }

        self.book.last_update_id = diff.final_update_id;
        self.book.event_time_ms = diff.event_time;
        self.book.applied_at = Instant::now();
        self.applied_updates += 1;

        debug!(
            symbol = %self.book.symbol,
            last_update_id = diff.final_update_id,
            bid_updates = diff.bids.len(),
            ask_updates = diff.asks.len(),
            "Applied depth diff"
        );

        self.notify_observers();
        Ok(SyncOutcome::Applied)
    }

    fn notify_observers(&mut self) {
        for observer in &mut self.observers {
            if let Err(e) = observer.on_book_update(&self.book) {
                warn!(
                    symbol = %self.book.symbol,
                    error = %e,
                    "Book observer failed; continuing apply loop"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn snapshot(last_update_id: u64) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id,
            bids: vec![
                ("100.0".into(), "1.0".into()),
                ("99.5".into(), "2.0".into()),
            ],
            asks: vec![
                ("100.5".into(), "1.5".into()),
                ("101.0".into(), "3.0".into()),
            ],
        }
    }

    fn diff(first: u64, last: u64, prev: u64) -> DepthDiff {
        DepthDiff {
            event_type: "depthUpdate".into(),
            event_time: 1_700_000_000_000,
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: prev,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn test_bridging_boot_then_contiguous() {
        let mut sync = OrderBookSynchronizer::new("btcusdt");
        sync.apply_snapshot(&snapshot(1000)).unwrap();

        let mut a = diff(995, 1001, 994);
        a.bids.push(["99.0".into(), "5.0".into()]);
        assert_eq!(sync.handle_diff(&a).unwrap(), SyncOutcome::Applied);
        assert_eq!(sync.last_update_id(), 1001);

        let b = diff(1002, 1005, 1001);
        assert_eq!(sync.handle_diff(&b).unwrap(), SyncOutcome::Applied);
        assert_eq!(sync.last_update_id(), 1005);
    }

    #[test]
    fn test_gap_invalidates_until_snapshot() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1005)).unwrap();

        let gapped = diff(1010, 1015, 1009);
        assert_eq!(
            sync.handle_diff(&gapped).unwrap(),
            SyncOutcome::NeedsResnapshot
        );
        assert!(sync.is_invalidated());

        // Even a contiguous-looking diff is refused until a snapshot lands.
        let contiguous = diff(1006, 1008, 1005);
        assert_eq!(
            sync.handle_diff(&contiguous).unwrap(),
            SyncOutcome::NeedsResnapshot
        );

        sync.apply_snapshot(&snapshot(1016)).unwrap();
        assert!(!sync.is_invalidated());
    }

    #[test]
    fn test_zero_qty_removes_and_id_monotonic() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();

        let mut d = diff(1001, 1002, 1000);
        d.bids.push(["99.5".into(), "0".into()]);
        assert_eq!(sync.handle_diff(&d).unwrap(), SyncOutcome::Applied);

        let book = sync.current_snapshot();
        assert_eq!(book.ladder.level_count(Side::Bid), 1);
        assert!(book.ladder.iter_bids().all(|(_, q)| !q.is_zero()));

        let stale = diff(900, 950, 899);
        assert_eq!(sync.handle_diff(&stale).unwrap(), SyncOutcome::Skipped);
        assert_eq!(sync.last_update_id(), 1002);
    }

    #[test]
    fn test_crossed_book_drops_ladder() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();

        // Bid through the best ask crosses the book.
        let mut d = diff(1001, 1002, 1000);
        d.bids.push(["100.5".into(), "1.0".into()]);
        assert_eq!(
            sync.handle_diff(&d).unwrap(),
            SyncOutcome::NeedsResnapshot
        );
        assert!(sync.current_snapshot().ladder.is_empty());
        assert!(sync.is_invalidated());
    }

    #[test]
    fn test_violations_reports_crossed_prices() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();
        assert!(sync.violations().is_empty());

        // Drive the ladder into the state apply_diff sees right before it
        // drops a crossed book: a bid resting above the best ask.
        sync.book.ladder.apply_level(
            Side::Bid,
            Decimal::from_str("101.5").unwrap(),
            Decimal::ONE,
        );

        assert_eq!(
            sync.violations(),
            vec![LadderViolation::CrossedBook {
                best_bid: Decimal::from_str("101.5").unwrap(),
                best_ask: Decimal::from_str("100.5").unwrap(),
            }]
        );
    }

    #[test]
    fn test_parse_failure_leaves_book_untouched() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();

        let mut d = diff(1001, 1002, 1000);
        d.bids.push(["99.0".into(), "1.0".into()]);
        d.asks.push(["garbage".into(), "1.0".into()]);
        assert!(sync.handle_diff(&d).is_err());

        // Neither side changed and the id did not advance.
        let book = sync.current_snapshot();
        assert_eq!(book.last_update_id, 1000);
        assert_eq!(book.ladder.level_count(Side::Bid), 2);
    }

    #[test]
    fn test_round_trip_restores_snapshot() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();
        let before = sync.current_snapshot();

        // Add a level, then remove it again two diffs later.
        let mut add = diff(1001, 1002, 1000);
        add.bids.push(["98.0".into(), "7.0".into()]);
        sync.handle_diff(&add).unwrap();

        let mut remove = diff(1003, 1004, 1002);
        remove.bids.push(["98.0".into(), "0".into()]);
        sync.handle_diff(&remove).unwrap();

        let after = sync.current_snapshot();
        assert_eq!(after.last_update_id, 1004);
        assert_eq!(
            after.ladder.top_k(Side::Bid, 10),
            before.ladder.top_k(Side::Bid, 10)
        );
        assert_eq!(
            after.ladder.top_k(Side::Ask, 10),
            before.ladder.top_k(Side::Ask, 10)
        );
    }

    #[test]
    fn test_observer_failure_is_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.subscribe(Box::new(move |_book: &BookState| -> anyhow::Result<()> {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("observer exploded")
        }));

        sync.apply_snapshot(&snapshot(1000)).unwrap();
        let d = diff(1001, 1002, 1000);
        assert_eq!(sync.handle_diff(&d).unwrap(), SyncOutcome::Applied);

        let d2 = diff(1003, 1004, 1002);
        assert_eq!(sync.handle_diff(&d2).unwrap(), SyncOutcome::Applied);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stats_counters() {
        let mut sync = OrderBookSynchronizer::new("BTCUSDT");
        sync.apply_snapshot(&snapshot(1000)).unwrap();
        sync.handle_diff(&diff(1001, 1002, 1000)).unwrap();

        let stats = sync.stats();
        assert_eq!(stats.rest_snapshots, 1);
        assert_eq!(stats.applied_updates, 1);
        assert_eq!(stats.bid_levels, 2);
        assert!(stats.spread.is_some());
    }
}
