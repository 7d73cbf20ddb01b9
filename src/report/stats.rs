//! Run-wide counters.
//!
//! Counters are atomics so experiment groups processed on different worker
//! threads can record into the same instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one alignment run.
#[derive(Debug)]
pub struct RunStats {
    /// Experiment groups fused (and trimmed) to completion
    groups_completed: AtomicU64,
    /// Experiment groups skipped for a missing stream or marker
    groups_skipped: AtomicU64,
    /// Fused records written
    records_fused: AtomicU64,
    /// Driving records dropped for lack of a required match
    records_dropped: AtomicU64,
    /// Fused records removed by trimming
    records_removed: AtomicU64,
    /// Input record files that could not be decoded
    records_malformed: AtomicU64,
    /// Run start time
    started_at: DateTime<Utc>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            groups_completed: AtomicU64::new(0),
            groups_skipped: AtomicU64::new(0),
            records_fused: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            records_removed: AtomicU64::new(0),
            records_malformed: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_group_completed(&self) {
        self.groups_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_group_skipped(&self) {
        self.groups_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fused(&self, count: u64) {
        self.records_fused.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.records_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_removed(&self, count: u64) {
        self.records_removed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: u64) {
        self.records_malformed.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            groups_completed: self.groups_completed.load(Ordering::Relaxed),
            groups_skipped: self.groups_skipped.load(Ordering::Relaxed),
            records_fused: self.records_fused.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            records_malformed: self.records_malformed.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Run Statistics:\n\
             - Experiments completed: {}\n\
             - Experiments skipped: {}\n\
             - Fused records written: {}\n\
             - Driving records dropped: {}\n\
             - Records removed by trim: {}\n\
             - Malformed input records: {}\n\
             - Elapsed: {} ms",
            stats.groups_completed,
            stats.groups_skipped,
            stats.records_fused,
            stats.records_dropped,
            stats.records_removed,
            stats.records_malformed,
            stats.elapsed_ms
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.groups_completed.store(0, Ordering::Relaxed);
        self.groups_skipped.store(0, Ordering::Relaxed);
        self.records_fused.store(0, Ordering::Relaxed);
        self.records_dropped.store(0, Ordering::Relaxed);
        self.records_removed.store(0, Ordering::Relaxed);
        self.records_malformed.store(0, Ordering::Relaxed);
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub groups_completed: u64,
    pub groups_skipped: u64,
    pub records_fused: u64,
    pub records_dropped: u64,
    pub records_removed: u64,
    pub records_malformed: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Thread-safe shared run statistics.
pub type SharedRunStats = Arc<RunStats>;

/// Create new shared run statistics.
pub fn create_shared_stats() -> SharedRunStats {
    Arc::new(RunStats::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counting() {
        let stats = RunStats::new();
        stats.record_group_completed();
        stats.record_group_skipped();
        stats.record_group_completed();
        stats.record_fused(6);
        stats.record_dropped(4);

        let snap = stats.snapshot();
        assert_eq!(snap.groups_completed, 2);
        assert_eq!(snap.groups_skipped, 1);
        assert_eq!(snap.records_fused, 6);
        assert_eq!(snap.records_dropped, 4);
    }

    #[test]
    fn test_shared_across_threads() {
        let stats = create_shared_stats();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_fused(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().records_fused, 400);
    }

    #[test]
    fn test_reset_and_summary() {
        let stats = RunStats::new();
        stats.record_removed(7);
        assert!(stats.summary().contains("Records removed by trim: 7"));
        stats.reset();
        assert_eq!(stats.snapshot().records_removed, 0);
        assert!(stats.summary().contains("Experiments skipped"));
    }
}
