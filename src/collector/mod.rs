//! Acquisition-side persistence.
//!
//! Sensor drivers live outside this crate. What is here is the part every
//! capture loop shares: stamping snapshots, queueing them to a background
//! writer, and stopping cleanly on Ctrl+C or a stop key.

pub mod ingest;
pub mod recorder;
pub mod stop;
pub mod types;

// Re-export commonly used types
pub use ingest::{ingest_lines, IngestSummary};
pub use recorder::{Recorder, RecorderError, SnapshotSender, DEFAULT_QUEUE_CAPACITY};
pub use stop::{spawn_key_listener, StopFlag, DEFAULT_STOP_KEY};
pub use types::{now_millis, IngestLine, Snapshot, TACTILE_CLOCK_OFFSET_MS};
