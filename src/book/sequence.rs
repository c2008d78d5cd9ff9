//! Diff sequence gate
//!
//! Stateless classification of an incoming depth diff against the book's
//! last applied update id. Futures contiguity: a diff is contiguous when
//! its `pu` equals the last applied `u`. The bridging range rule links
//! buffered stream events to a fresh REST snapshot exactly once.

use crate::book::types::DepthDiff;

/// What to do with an incoming diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Contiguous or bridging: apply to the ladder
    Apply,
    /// Entirely before the current state: drop
    Skip,
    /// Gap detected: the ladder can no longer be trusted
    Resnapshot,
}

/// Classify `diff` against `last_update_id`.
pub fn classify(diff: &DepthDiff, last_update_id: u64) -> DiffAction {
    if diff.final_update_id < last_update_id {
        return DiffAction::Skip;
    }
    if diff.prev_final_update_id == last_update_id {
        return DiffAction::Apply;
    }
    if diff.first_update_id <= last_update_id && last_update_id <= diff.final_update_id {
        return DiffAction::Apply;
    }
    DiffAction::Resnapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(first: u64, last: u64, prev: u64) -> DepthDiff {
        DepthDiff {
            event_type: "depthUpdate".into(),
            event_time: 0,
            symbol: "BTCUSDT".into(),
            first_update_id: first,
            final_update_id: last,
            prev_final_update_id: prev,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn test_stale_diff_skipped() {
        assert_eq!(classify(&diff(900, 950, 899), 1000), DiffAction::Skip);
    }

    #[test]
    fn test_contiguous_diff_applied() {
        assert_eq!(classify(&diff(1001, 1005, 1000), 1000), DiffAction::Apply);
    }

    #[test]
    fn test_bridging_boot_sequence() {
        // Snapshot lastUpdateId = 1000, buffered diffs A then B.
        let a = diff(995, 1001, 994);
        let b = diff(1002, 1005, 1001);

        // A brackets the snapshot id: bridging applies it.
        assert_eq!(classify(&a, 1000), DiffAction::Apply);
        // After A, last = 1001 and B is contiguous by pu.
        assert_eq!(classify(&b, 1001), DiffAction::Apply);
    }

    #[test]
    fn test_gap_demands_resnapshot() {
        assert_eq!(classify(&diff(1010, 1015, 1009), 1005), DiffAction::Resnapshot);
    }

    #[test]
    fn test_equal_final_id_is_not_skipped() {
        // u == last: bridging range still covers it.
        assert_eq!(classify(&diff(998, 1000, 990), 1000), DiffAction::Apply);
    }
}
