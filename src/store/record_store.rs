//! Directory-backed record stores.
//!
//! A store directory holds one `<timestamp>.json` file per record. Loading
//! reads every decodable record into memory sorted by timestamp; files that
//! cannot be decoded are logged and skipped. Deleting records from disk is
//! only ever done through the explicit [`RecordStore::delete_below`] and
//! [`RecordStore::clear`] calls.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::store::record::{
    parse_timestamp_name, record_file_name, Payload, Timestamp, TimestampedRecord,
    RECORD_EXTENSION,
};

/// Errors raised by record stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("could not encode record {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        StoreError::MalformedRecord {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether this error only concerns a single record and may be skipped.
    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::MalformedRecord { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// An in-memory, ascending, duplicate-free sequence of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    records: Vec<TimestampedRecord>,
    malformed: usize,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records in any order.
    ///
    /// Records are sorted ascending; when two records share a timestamp the
    /// one that came later in `records` wins.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TimestampedRecord>,
    {
        let mut by_time = BTreeMap::new();
        for record in records {
            by_time.insert(record.timestamp, record);
        }
        Self {
            records: by_time.into_values().collect(),
            malformed: 0,
        }
    }

    /// Load every record file in `dir`.
    ///
    /// Files without the record extension are ignored. Record files whose
    /// name is not an integer or whose content is not a JSON object are
    /// counted as malformed and skipped.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut loaded = Vec::new();
        let mut malformed = 0;

        for path in record_files(dir)? {
            match read_record(&path) {
                Ok(record) => loaded.push(record),
                Err(e) if e.is_malformed() => {
                    tracing::warn!("Skipping {e}");
                    malformed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let mut store = Self::from_records(loaded);
        store.malformed = malformed;
        tracing::debug!(
            "Loaded {} records from {} ({} malformed)",
            store.len(),
            dir.display(),
            malformed
        );
        Ok(store)
    }

    /// Records in ascending timestamp order.
    pub fn records(&self) -> &[TimestampedRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of record files skipped while loading.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    pub(crate) fn add_malformed(&mut self, count: usize) {
        self.malformed += count;
    }

    /// Earliest record.
    pub fn first(&self) -> Option<&TimestampedRecord> {
        self.records.first()
    }

    /// Latest record.
    pub fn last(&self) -> Option<&TimestampedRecord> {
        self.records.last()
    }

    /// Milliseconds between the first and last record.
    pub fn span_ms(&self) -> Option<u64> {
        Some(self.last()?.timestamp.abs_diff(self.first()?.timestamp))
    }

    /// Timestamps in ascending order.
    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.records.iter().map(|r| r.timestamp)
    }

    /// Records with `timestamp >= cutoff`. Does not touch the store.
    pub fn filter_min(&self, cutoff: Timestamp) -> &[TimestampedRecord] {
        let start = self.records.partition_point(|r| r.timestamp < cutoff);
        &self.records[start..]
    }

    /// Path a record with this timestamp is stored at.
    pub fn record_path<P: AsRef<Path>>(dir: P, timestamp: Timestamp) -> PathBuf {
        dir.as_ref().join(record_file_name(timestamp))
    }

    /// Persist one record as `<dir>/<timestamp>.json`, creating `dir`.
    pub fn write<P: AsRef<Path>>(dir: P, record: &TimestampedRecord) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let path = Self::record_path(dir, record.timestamp);
        let bytes = serde_json::to_vec(&record.payload).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }

    /// Remove every record file whose timestamp is strictly below `cutoff`.
    ///
    /// Returns the number of files removed. Files whose names are not
    /// timestamps are left alone.
    pub fn delete_below<P: AsRef<Path>>(dir: P, cutoff: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for path in record_files(dir.as_ref())? {
            let Some(timestamp) = timestamp_of(&path) else {
                continue;
            };
            if timestamp < cutoff {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every record file in `dir`, leaving other files in place.
    ///
    /// A missing directory counts as already clear.
    pub fn clear<P: AsRef<Path>>(dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for path in record_files(dir)? {
            if timestamp_of(&path).is_some() {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Read and decode a single record file.
pub fn read_record(path: &Path) -> Result<TimestampedRecord> {
    let timestamp = timestamp_of(path)
        .ok_or_else(|| StoreError::malformed(path, "file name is not a timestamp"))?;

    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let payload: Payload = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::malformed(path, format!("undecodable content: {e}")))?;

    Ok(TimestampedRecord::new(timestamp, payload))
}

/// List files in `dir` carrying the record extension.
pub(crate) fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && has_record_extension(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

fn has_record_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == RECORD_EXTENSION)
        .unwrap_or(false)
}

fn timestamp_of(path: &Path) -> Option<Timestamp> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(parse_timestamp_name)
}
