//! Nearest-timestamp matching.
//!
//! Given a query time and candidates sorted ascending by timestamp, pick the
//! candidate with the smallest absolute time difference. When two candidates
//! are equally close the earlier one wins. A best candidate farther away than
//! the tolerance is no match at all.

use crate::store::{Timestamp, Timestamped};

/// A candidate accepted within tolerance.
#[derive(Debug)]
pub struct Match<'a, T> {
    /// The selected candidate
    pub candidate: &'a T,
    /// |query - candidate| in milliseconds
    pub skew_ms: u64,
}

impl<'a, T: Timestamped> Match<'a, T> {
    pub fn timestamp(&self) -> Timestamp {
        self.candidate.timestamp()
    }
}

/// Find the candidate closest to `query` within `tolerance_ms`.
///
/// `candidates` must be sorted ascending by timestamp. The result is the
/// same as a front-to-back scan keeping the first minimum, found with two
/// binary searches instead.
pub fn find_nearest<T: Timestamped>(
    query: Timestamp,
    candidates: &[T],
    tolerance_ms: u64,
) -> Option<Match<'_, T>> {
    let after = candidates.partition_point(|c| c.timestamp() < query);

    // Earliest candidate sharing the timestamp just below the query.
    let before = after.checked_sub(1).map(|i| {
        let ts = candidates[i].timestamp();
        candidates[..i].partition_point(|c| c.timestamp() < ts)
    });

    let best = match (before, candidates.get(after)) {
        (Some(b), Some(a)) => {
            let before_skew = query.abs_diff(candidates[b].timestamp());
            let after_skew = query.abs_diff(a.timestamp());
            if after_skew < before_skew {
                a
            } else {
                &candidates[b]
            }
        }
        (Some(b), None) => &candidates[b],
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let skew_ms = query.abs_diff(best.timestamp());
    (skew_ms <= tolerance_ms).then_some(Match {
        candidate: best,
        skew_ms,
    })
}
