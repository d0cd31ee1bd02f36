//! Rank and percentile assignment over a leaderboard's full entry set.
//!
//! This module is the only writer of `rank` and `percentile`. Every pass
//! operates on the complete entry set of one leaderboard; there is no
//! incremental re-ranking.

use std::cmp::Ordering;

use super::models::{LeaderboardEntry, SortDirection};

/// Orders two entries in the given direction. Ties on score break by
/// submission time, then id, so repeated passes over unchanged data are
/// deterministic.
pub fn compare_in_direction(
    a: &LeaderboardEntry,
    b: &LeaderboardEntry,
    direction: SortDirection,
) -> Ordering {
    let by_score = match direction {
        SortDirection::Descending => b.score.partial_cmp(&a.score),
        SortDirection::Ascending => a.score.partial_cmp(&b.score),
    }
    .unwrap_or(Ordering::Equal);

    by_score
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts entries in scoring-direction order without touching ranks.
pub fn sort_in_direction(entries: &mut [LeaderboardEntry], direction: SortDirection) {
    entries.sort_by(|a, b| compare_in_direction(a, b, direction));
}

/// Percentile for a 1-based rank among `total` entries:
/// (total - rank) / total * 100. A single entry is the 100th percentile.
pub fn percentile_for(rank: i32, total: usize) -> f64 {
    if total <= 1 {
        100.0
    } else {
        (total as f64 - rank as f64) / total as f64 * 100.0
    }
}

/// Sorts the full entry set in the given direction and assigns strict
/// positional ranks 1..=N (ties separated by the stable order above) and
/// percentiles. An empty set is a no-op.
pub fn assign_ranks(entries: &mut [LeaderboardEntry], direction: SortDirection) {
    sort_in_direction(entries, direction);

    let total = entries.len();
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = (index + 1) as i32;
        entry.percentile = percentile_for(entry.rank, total);
    }
}
