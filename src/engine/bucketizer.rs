//! Collateral histogram over fixed token-unit buckets.

use crate::domain::{to_token_units, Decimal, BUCKET_COUNT};
use alloy::primitives::U256;

/// Half-open `(lo, hi]` bucket bounds in whole tokens.
pub const BUCKET_BOUNDS: [(u32, u32); BUCKET_COUNT] =
    [(0, 10), (10, 20), (20, 100), (100, 500), (500, 1000)];

/// Count raw (1e18-scaled) costs per collateral bucket.
///
/// Each value lands in the first bucket whose range contains it. Values at
/// or below zero, above the top bound, or too large to convert are dropped.
pub fn bucketize(raw_costs: &[U256]) -> [u32; BUCKET_COUNT] {
    let mut counts = [0u32; BUCKET_COUNT];
    for raw in raw_costs {
        let Ok(tokens) = to_token_units(*raw) else {
            continue;
        };
        if let Some(i) = bucket_index(tokens) {
            counts[i] += 1;
        }
    }
    counts
}

fn bucket_index(tokens: Decimal) -> Option<usize> {
    BUCKET_BOUNDS
        .iter()
        .position(|&(lo, hi)| tokens > Decimal::from(lo) && tokens <= Decimal::from(hi))
}
