//! Bucket aggregation
//!
//! Stateless fold of a ladder snapshot into contiguous fixed-width price
//! buckets. Bucket width is `mid_price * volatility_ratio`; all boundary
//! decisions use left-closed / right-open intervals in scaled-integer
//! space so the same price always lands in the same bucket.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::book::types::BookState;
use crate::signal::types::{BucketSnapshot, BucketVolume, PRICE_SCALE};

/// Upper bound on buckets per snapshot; a span/step combination beyond
/// this means the volatility ratio is degenerate for the current price.
const MAX_BUCKETS: i64 = 100_000;

fn scale_decimal(price: Decimal) -> Option<i64> {
    (price * Decimal::from(PRICE_SCALE)).trunc().to_i64()
}

/// Aggregate one book snapshot into buckets of width `mid * ratio`.
///
/// Returns None when the book is empty on both sides or no volatility
/// ratio has been published yet.
pub fn aggregate(book: &BookState, ratio: f64) -> Option<BucketSnapshot> {
    if ratio <= 0.0 || !ratio.is_finite() {
        return None;
    }

    let mid = book.mid_price()?;
    let mid_f = mid.to_f64()?;
    if mid_f <= 0.0 {
        return None;
    }

    let width = mid_f * ratio;
    let step_scaled = ((width * PRICE_SCALE as f64).round() as i64).max(1);

    let (min_price, max_price) = book.ladder.price_span()?;
    let min_scaled = scale_decimal(min_price)?;
    let max_scaled = scale_decimal(max_price)?;

    let first_idx = min_scaled.div_euclid(step_scaled);
    let last_idx = max_scaled.div_euclid(step_scaled);
    let bucket_count = last_idx - first_idx + 1;
    if bucket_count > MAX_BUCKETS {
        warn!(
            step_scaled,
            bucket_count, "Bucket enumeration too large, skipping aggregation"
        );
        return None;
    }

    let mut buckets: Vec<BucketVolume> = (first_idx..=last_idx)
        .map(|idx| {
            let key = idx * step_scaled;
            BucketVolume {
                key,
                start: key as f64 / PRICE_SCALE as f64,
                end: (key + step_scaled) as f64 / PRICE_SCALE as f64,
                bid_vol: 0.0,
                ask_vol: 0.0,
            }
        })
        .collect();

    let min_key = first_idx * step_scaled;
    let end_key = last_idx * step_scaled + step_scaled;

    // Bids descend: once a price drops below the first bucket start the
    // rest of the side cannot contribute.
    for (price, qty) in book.ladder.iter_bids() {
        let Some(sp) = scale_decimal(price) else { continue };
        if sp < min_key {
            break;
        }
        let slot = (sp.div_euclid(step_scaled) - first_idx) as usize;
        if let Some(bucket) = buckets.get_mut(slot) {
            bucket.bid_vol += qty.to_f64().unwrap_or(0.0);
        }
    }

    // Asks ascend: stop once past the right edge of the last bucket.
    for (price, qty) in book.ladder.iter_asks() {
        let Some(sp) = scale_decimal(price) else { continue };
        if sp >= end_key {
            break;
        }
        let slot = (sp.div_euclid(step_scaled) - first_idx) as usize;
        if let Some(bucket) = buckets.get_mut(slot) {
            bucket.ask_vol += qty.to_f64().unwrap_or(0.0);
        }
    }

    Some(BucketSnapshot {
        event_time_ms: book.event_time_ms,
        step_scaled,
        buckets,
    })
}
