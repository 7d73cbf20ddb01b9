//! File-backed record stores.
//!
//! This module contains:
//! - The timestamped record type shared by every stream
//! - Per-record directory stores (one file per sample)
//! - The trajectory layout (one file per session, exploded into samples)
//! - Event marker files used as trim cutoffs

pub mod marker;
pub mod record;
pub mod record_store;
pub mod trajectory;

use std::path::Path;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use marker::{append_event_marker, read_event_marker, MarkerError, GRASP_MARKER_FILE};
pub use record::{Payload, Timestamp, Timestamped, TimestampedRecord};
pub use record_store::{RecordStore, StoreError};
pub use trajectory::{load_trajectory_dir, write_trajectory, TrajectorySample};

/// How a stream lays its records out on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamLayout {
    /// One `<timestamp>.json` file per record
    #[default]
    PerRecord,
    /// Session files holding many samples each
    Trajectory,
}

impl StreamLayout {
    /// Load a stream directory according to this layout.
    pub fn load<P: AsRef<Path>>(self, dir: P) -> Result<RecordStore, StoreError> {
        match self {
            StreamLayout::PerRecord => RecordStore::load(dir),
            StreamLayout::Trajectory => load_trajectory_dir(dir),
        }
    }
}
