//! Pressure signal detection
//!
//! Per-bucket sliding histories of resting and traded volume feed a
//! three-stage gate: rate-of-change candidate, consecutive-sample
//! persistence, and trade-flow confirmation. Neighbor buckets upgrade a
//! candidate to its STRONG variant. One sample is taken per applied
//! ladder snapshot; trade volumes enter as window aggregates, so depth
//! and trade arrival order never needs to be reconciled per event.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::signal::trades::TradeRouter;
use crate::signal::types::{BucketSnapshot, Signal, SignalKind};

/// Hard bounds on the sliding window regardless of configuration.
const WINDOW_FLOOR: usize = 2;
const WINDOW_CEIL: usize = 40;

#[derive(Debug, Default)]
struct BucketState {
    /// (bid_vol, ask_vol) per ladder snapshot, most recent last
    resting: VecDeque<(f64, f64)>,
    /// Combined directional trade volume per snapshot
    trade_buy: VecDeque<f64>,
    trade_sell: VecDeque<f64>,
    persist_buy: u32,
    persist_sell: u32,
}

struct BucketRates {
    bid_rate: f64,
    ask_rate: f64,
}

/// Detector over the bucketed snapshot stream. Owns every bucket window;
/// runs on the depth task.
pub struct SignalDetector {
    buy_rate: f64,
    ask_drop: f64,
    sell_rate: f64,
    bid_drop: f64,
    persist_samples: u32,
    confirm_trade_rate: f64,
    max_buffer_size: usize,
    states: HashMap<i64, BucketState>,
    router: Arc<TradeRouter>,
    paused: Arc<AtomicBool>,
}

impl SignalDetector {
    pub fn new(config: &EngineConfig, router: Arc<TradeRouter>, paused: Arc<AtomicBool>) -> Self {
        Self {
            buy_rate: config.buy_rate,
            ask_drop: config.ask_drop,
            sell_rate: config.sell_rate,
            bid_drop: config.bid_drop,
            persist_samples: config.persist_samples,
            confirm_trade_rate: config.confirm_trade_rate,
            max_buffer_size: config.max_buffer_size,
            states: HashMap::new(),
            router,
            paused,
        }
    }

    /// Process one bucketed snapshot with window size `window` and return
    /// the signals that fired. Signals are suppressed (but counters still
    /// advance and reset) while the engine is paused.
    pub fn on_snapshot(&mut self, snapshot: &BucketSnapshot, window: usize) -> Vec<Signal> {
        let n = window.clamp(WINDOW_FLOOR, WINDOW_CEIL);

        // First pass: sample resting volumes and compute change rates for
        // every bucket, so neighbor lookups in the second pass see the
        // current sample on both sides.
        let mut rates = Vec::with_capacity(snapshot.buckets.len());
        for bucket in &snapshot.buckets {
            let state = self.states.entry(bucket.key).or_default();
            push_capped(
                &mut state.resting,
                (bucket.bid_vol, bucket.ask_vol),
                self.max_buffer_size,
            );

            let (avg_bid, avg_ask) = resting_window_mean(&state.resting, n);
            rates.push(BucketRates {
                bid_rate: change_rate(bucket.bid_vol, avg_bid),
                ask_rate: change_rate(bucket.ask_vol, avg_ask),
            });
        }

        let mut signals = Vec::new();

        for (i, bucket) in snapshot.buckets.iter().enumerate() {
            let r = &rates[i];
            let buy_candidate = r.bid_rate >= self.buy_rate && r.ask_rate <= self.ask_drop;
            let sell_candidate = r.ask_rate >= self.sell_rate && r.bid_rate <= self.bid_drop;

            let strong_buy = buy_candidate
                && rates
                    .get(i + 1)
                    .is_some_and(|next| next.ask_rate <= self.ask_drop);
            let strong_sell = sell_candidate
                && i > 0
                && rates[i - 1].bid_rate <= self.bid_drop;

            // Directional trade flow: this bucket plus the adjacent bucket
            // on the side the aggressor came from.
            let left_key = bucket.key - snapshot.step_scaled;
            let right_key = bucket.key + snapshot.step_scaled;
            let trade_buy_combined =
                self.router.recent_buy_volume(bucket.key) + self.router.recent_buy_volume(left_key);
            let trade_sell_combined = self.router.recent_sell_volume(bucket.key)
                + self.router.recent_sell_volume(right_key);

            let (fire_buy, fire_sell) = {
                let state = self
                    .states
                    .get_mut(&bucket.key)
                    .expect("bucket state created in rate pass");

                if buy_candidate {
                    state.persist_buy += 1;
                } else {
                    state.persist_buy = 0;
                }
                if sell_candidate {
                    state.persist_sell += 1;
                } else {
                    state.persist_sell = 0;
                }

                push_capped(&mut state.trade_buy, trade_buy_combined, self.max_buffer_size);
                push_capped(
                    &mut state.trade_sell,
                    trade_sell_combined,
                    self.max_buffer_size,
                );

                let confirm_buy = trade_confirmed(
                    &state.trade_buy,
                    trade_buy_combined,
                    n,
                    self.confirm_trade_rate,
                );
                let confirm_sell = trade_confirmed(
                    &state.trade_sell,
                    trade_sell_combined,
                    n,
                    self.confirm_trade_rate,
                );

                let fire_buy = state.persist_buy >= self.persist_samples && confirm_buy;
                if fire_buy {
                    state.persist_buy = 0;
                }
                let fire_sell = state.persist_sell >= self.persist_samples && confirm_sell;
                if fire_sell {
                    state.persist_sell = 0;
                }
                (fire_buy, fire_sell)
            };

            // Buy is evaluated (and reported) before sell.
            if fire_buy {
                self.emit(
                    &mut signals,
                    Signal {
                        kind: if strong_buy {
                            SignalKind::StrongBuy
                        } else {
                            SignalKind::Buy
                        },
                        bucket_start: bucket.start,
                        bucket_end: bucket.end,
                        timestamp_ms: snapshot.event_time_ms,
                        bid_rate: r.bid_rate,
                        ask_rate: r.ask_rate,
                        resting_vol: bucket.bid_vol,
                        trade_vol_combined: trade_buy_combined,
                    },
                );
            }
            if fire_sell {
                self.emit(
                    &mut signals,
                    Signal {
                        kind: if strong_sell {
                            SignalKind::StrongSell
                        } else {
                            SignalKind::Sell
                        },
                        bucket_start: bucket.start,
                        bucket_end: bucket.end,
                        timestamp_ms: snapshot.event_time_ms,
                        bid_rate: r.bid_rate,
                        ask_rate: r.ask_rate,
                        resting_vol: bucket.ask_vol,
                        trade_vol_combined: trade_sell_combined,
                    },
                );
            }
        }

        self.evict_departed(snapshot);
        signals
    }

    fn emit(&self, signals: &mut Vec<Signal>, signal: Signal) {
        if self.paused.load(Ordering::Acquire) {
            debug!(
                kind = ?signal.kind,
                bucket_start = signal.bucket_start,
                "Signal suppressed while paused"
            );
            return;
        }
        info!(
            kind = ?signal.kind,
            bucket_start = signal.bucket_start,
            bucket_end = signal.bucket_end,
            bid_rate = signal.bid_rate,
            ask_rate = signal.ask_rate,
            trade_vol = signal.trade_vol_combined,
            "Pressure signal"
        );
        signals.push(signal);
    }

    /// Drop state for buckets that left the enumerated span, unless their
    /// trade windows still hold unexpired entries.
    fn evict_departed(&mut self, snapshot: &BucketSnapshot) {
        let current: std::collections::HashSet<i64> = snapshot.keys().collect();
        let router = &self.router;
        self.states
            .retain(|key, _| current.contains(key) || router.has_entries(*key));
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.states.len()
    }
}

fn push_capped<T>(ring: &mut VecDeque<T>, value: T, cap: usize) {
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(value);
}

/// Mean of the window's samples excluding the most recent: with history
/// h and window n, averages h[len-n .. len-1].
fn resting_window_mean(resting: &VecDeque<(f64, f64)>, n: usize) -> (f64, f64) {
    let len = resting.len();
    let start = len.saturating_sub(n);
    let count = len.saturating_sub(1).saturating_sub(start);
    if count == 0 {
        return (0.0, 0.0);
    }

    let mut bid_sum = 0.0;
    let mut ask_sum = 0.0;
    for (bid, ask) in resting.iter().skip(start).take(count) {
        bid_sum += bid;
        ask_sum += ask;
    }
    (bid_sum / count as f64, ask_sum / count as f64)
}

/// Ratio of the latest volume to the window mean; an empty or zero
/// history yields +inf for growth out of nothing, 0 for nothing at all.
fn change_rate(last: f64, avg: f64) -> f64 {
    if avg > 0.0 {
        last / avg
    } else if last > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Trade confirmation: latest combined volume against the mean of the
/// preceding window samples. An undefined (empty or zero) mean never
/// confirms.
fn trade_confirmed(history: &VecDeque<f64>, combined: f64, n: usize, threshold: f64) -> bool {
    let len = history.len();
    let start = len.saturating_sub(n);
    let count = len.saturating_sub(1).saturating_sub(start);
    if count == 0 {
        return false;
    }
    let mean: f64 = history.iter().skip(start).take(count).sum::<f64>() / count as f64;
    if mean <= 0.0 {
        return false;
    }
    combined / mean >= threshold
}
