//! Background persistence of captured snapshots.
//!
//! Acquisition loops push snapshots into a bounded queue; a single writer
//! thread drains it and writes each snapshot as one record file. Producers
//! never touch the filesystem.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

use crate::collector::types::Snapshot;
use crate::store::{RecordStore, StoreError};

/// Snapshots buffered before producers block.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors raised by the recorder.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recorder queue is closed")]
    Closed,

    #[error("failed to start writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("writer thread panicked")]
    WriterPanicked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cloneable handle for pushing snapshots to a [`Recorder`].
#[derive(Debug, Clone)]
pub struct SnapshotSender {
    sender: Sender<Snapshot>,
}

impl SnapshotSender {
    /// Queue a snapshot, blocking while the queue is full.
    pub fn send(&self, snapshot: Snapshot) -> Result<(), RecorderError> {
        self.sender.send(snapshot).map_err(|_| RecorderError::Closed)
    }
}

/// Persists snapshots into one experiment directory.
pub struct Recorder {
    dir: PathBuf,
    sender: Option<Sender<Snapshot>>,
    writer: Option<JoinHandle<Result<usize, StoreError>>>,
}

impl Recorder {
    /// Start a recorder writing into `dir`.
    pub fn start<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self, RecorderError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let (sender, receiver) = bounded(capacity.max(1));
        let writer_dir = dir.clone();
        let writer = thread::Builder::new()
            .name("snapshot-writer".to_string())
            .spawn(move || write_loop(&writer_dir, receiver))
            .map_err(RecorderError::Spawn)?;

        tracing::info!("Recording into {}", dir.display());
        Ok(Self {
            dir,
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A new producer handle.
    pub fn sender(&self) -> Result<SnapshotSender, RecorderError> {
        self.sender
            .as_ref()
            .map(|sender| SnapshotSender {
                sender: sender.clone(),
            })
            .ok_or(RecorderError::Closed)
    }

    /// Close the queue, wait for every queued snapshot to be written and
    /// return how many were persisted.
    ///
    /// Producer handles still alive keep the queue open, so drop them first.
    pub fn finish(mut self) -> Result<usize, RecorderError> {
        self.sender = None;
        match self.writer.take() {
            Some(writer) => {
                let written = writer.join().map_err(|_| RecorderError::WriterPanicked)??;
                tracing::info!("Recorded {written} snapshots into {}", self.dir.display());
                Ok(written)
            }
            None => Ok(0),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.sender = None;
        if let Some(writer) = self.writer.take() {
            if let Ok(Err(e)) = writer.join() {
                tracing::warn!("Recorder for {} stopped: {}", self.dir.display(), e);
            }
        }
    }
}

fn write_loop(dir: &Path, receiver: Receiver<Snapshot>) -> Result<usize, StoreError> {
    let mut written = 0;
    for snapshot in receiver.iter() {
        let path = RecordStore::write(dir, &snapshot.into_record())?;
        tracing::debug!("Wrote {}", path.display());
        written += 1;
    }
    Ok(written)
}
