//! Reporting for alignment runs.
//!
//! This module tracks what a run did (groups completed and skipped, records
//! fused, dropped and trimmed) and persists it as a JSON report.

pub mod run;
pub mod stats;

// Re-export commonly used types
pub use run::{GroupOutcome, GroupStatus, RunReport, SkewSummary, SkipReason};
pub use stats::{create_shared_stats, RunStats, SharedRunStats, StatsSnapshot};
