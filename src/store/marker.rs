//! Event marker files.
//!
//! A marker file is an append-only text log with one decimal millisecond
//! timestamp per line. The last entry is the authoritative one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::store::record::Timestamp;

/// Default marker file written by the grasp routine.
pub const GRASP_MARKER_FILE: &str = "grasp_time.txt";

/// Errors reading an event marker.
#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("event marker file not found: {0}")]
    Missing(PathBuf),

    #[error("event marker file {0} has no entries")]
    Empty(PathBuf),

    #[error("unparsable event marker {line:?} in {path}")]
    Unparsable { path: PathBuf, line: String },

    #[error("IO error reading event marker {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Read the authoritative (last non-blank) timestamp of a marker file.
pub fn read_event_marker<P: AsRef<Path>>(path: P) -> Result<Timestamp, MarkerError> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(MarkerError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(MarkerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let line = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .ok_or_else(|| MarkerError::Empty(path.to_path_buf()))?;

    line.parse().map_err(|_| MarkerError::Unparsable {
        path: path.to_path_buf(),
        line: line.to_string(),
    })
}

/// Append a timestamp to a marker file, creating it and its parents.
pub fn append_event_marker<P: AsRef<Path>>(path: P, timestamp: Timestamp) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{timestamp}")
}
