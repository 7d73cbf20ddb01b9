//! Removal of fused records captured before an event marker.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::store::{read_event_marker, MarkerError, RecordStore, StoreError, Timestamp};

/// Errors raised while trimming.
#[derive(Error, Debug)]
pub enum TrimError {
    #[error("missing event marker: {0}")]
    MissingMarker(#[from] MarkerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Deletes fused records older than the grasp event of their experiment.
#[derive(Debug, Clone)]
pub struct GraspEventTrimmer {
    marker_path: PathBuf,
}

impl GraspEventTrimmer {
    pub fn new(marker_path: impl Into<PathBuf>) -> Self {
        Self {
            marker_path: marker_path.into(),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// The cutoff currently recorded in the marker file.
    pub fn cutoff(&self) -> Result<Timestamp, TrimError> {
        Ok(read_event_marker(&self.marker_path)?)
    }

    /// Delete every record in `store_dir` strictly older than the marker.
    ///
    /// Returns the number of files removed; a second run with the same
    /// marker removes nothing.
    pub fn trim<P: AsRef<Path>>(&self, store_dir: P) -> Result<usize, TrimError> {
        let store_dir = store_dir.as_ref();
        let cutoff = self.cutoff()?;
        let removed = RecordStore::delete_below(store_dir, cutoff)?;
        tracing::info!(
            "Removed {removed} records before {cutoff} from {}",
            store_dir.display()
        );
        Ok(removed)
    }
}
