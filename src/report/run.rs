//! Per-run report of an alignment batch.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use uuid::Uuid;

use crate::core::fusion::StreamMatchStats;
use crate::report::stats::{RunStats, StatsSnapshot};

/// Why an experiment group was not processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// A required stream has no directory for this group
    MissingStream { stream: String },
    /// The event marker is absent or unreadable
    MissingMarker { detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingStream { stream } => write!(f, "missing '{stream}' data"),
            SkipReason::MissingMarker { detail } => write!(f, "{detail}"),
        }
    }
}

/// What happened to one experiment group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    Completed {
        fused: usize,
        dropped: usize,
        removed: usize,
        malformed: usize,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Outcome of one experiment group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub group: String,
    pub status: GroupStatus,
    #[serde(default)]
    pub streams: Vec<SkewSummary>,
}

impl GroupOutcome {
    pub fn skipped(group: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            group: group.into(),
            status: GroupStatus::Skipped { reason },
            streams: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, GroupStatus::Skipped { .. })
    }

    /// Records left in the output after trimming.
    pub fn retained(&self) -> usize {
        match self.status {
            GroupStatus::Completed { fused, removed, .. } => fused.saturating_sub(removed),
            GroupStatus::Skipped { .. } => 0,
        }
    }
}

/// Match-skew statistics of one auxiliary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkewSummary {
    pub stream: String,
    pub matched: usize,
    pub missed: usize,
    pub mean_ms: Option<f64>,
    pub std_dev_ms: Option<f64>,
    pub max_ms: Option<u64>,
}

impl SkewSummary {
    pub fn from_stats(stats: &StreamMatchStats) -> Self {
        let skews: Vec<f64> = stats.skews_ms.iter().map(|&s| s as f64).collect();
        let mean_ms = (!skews.is_empty()).then(|| Statistics::mean(&skews));
        let std_dev_ms = (skews.len() > 1).then(|| Statistics::std_dev(&skews));

        Self {
            stream: stats.stream.clone(),
            matched: stats.matched,
            missed: stats.missed,
            mean_ms,
            std_dev_ms,
            max_ms: stats.skews_ms.iter().copied().max(),
        }
    }
}

/// Everything a batch run produced, in experiment-group order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub groups: Vec<GroupOutcome>,
    pub totals: StatsSnapshot,
}

impl RunReport {
    pub fn new(groups: Vec<GroupOutcome>, stats: &RunStats) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            finished_at: Utc::now(),
            groups,
            totals: stats.snapshot(),
        }
    }

    /// Groups that were skipped.
    pub fn skipped(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.groups.iter().filter(|g| g.is_skipped())
    }

    /// Groups that were processed.
    pub fn completed(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.groups.iter().filter(|g| !g.is_skipped())
    }

    /// Save the report as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_skew_summary() {
        let stats = StreamMatchStats {
            stream: "tactile".to_string(),
            matched: 4,
            missed: 1,
            skews_ms: vec![2, 4, 4, 6],
        };
        let summary = SkewSummary::from_stats(&stats);
        assert_eq!(summary.mean_ms, Some(4.0));
        assert_eq!(summary.max_ms, Some(6));
        let std_dev = summary.std_dev_ms.unwrap();
        assert!((std_dev - (8.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_skew_summary_without_matches() {
        let stats = StreamMatchStats {
            stream: "trajectory".to_string(),
            matched: 0,
            missed: 3,
            skews_ms: Vec::new(),
        };
        let summary = SkewSummary::from_stats(&stats);
        assert_eq!(summary.mean_ms, None);
        assert_eq!(summary.std_dev_ms, None);
        assert_eq!(summary.max_ms, None);
    }

    #[test]
    fn test_report_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let stats = RunStats::new();
        let groups = vec![
            GroupOutcome {
                group: "0001".to_string(),
                status: GroupStatus::Completed {
                    fused: 10,
                    dropped: 2,
                    removed: 3,
                    malformed: 0,
                },
                streams: Vec::new(),
            },
            GroupOutcome::skipped(
                "0002",
                SkipReason::MissingStream {
                    stream: "tactile".to_string(),
                },
            ),
        ];
        let report = RunReport::new(groups, &stats);
        let path = dir.path().join("reports").join("run.json");
        report.save(&path).unwrap();

        let loaded: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.groups, report.groups);
        assert_eq!(loaded.completed().count(), 1);
        assert_eq!(loaded.skipped().count(), 1);
        assert_eq!(loaded.groups[0].retained(), 7);
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::MissingStream {
            stream: "tactile".to_string(),
        };
        assert_eq!(reason.to_string(), "missing 'tactile' data");
    }
}
