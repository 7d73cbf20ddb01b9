//! Visuotactile Align - offline timestamp alignment for manipulation recordings.
//!
//! A recording session writes independent, timestamped streams: camera
//! frames, tactile sensor readings and robot arm trajectories. This library
//! pairs every camera frame with the nearest sample of each other stream,
//! writes the fused records, and trims the fused timeline at the grasp event.
//!
//! # Guarantees
//!
//! - **Bounded skew**: A fused sample is never further than its stream's tolerance from the frame
//! - **Earliest on ties**: Equidistant candidates resolve to the earlier sample
//! - **Sorted stores**: Records are always handled in ascending timestamp order
//! - **Idempotent trim**: Trimming twice with the same marker removes nothing more
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Visuotactile Align                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Record    │──▶│   Nearest   │──▶│   Fusion    │       │
//! │  │   Stores    │   │   Matcher   │   │   Engine    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         ▲                                    │              │
//! │         │                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │  Recorder   │                     │ Grasp Event │       │
//! │  │ (capture)   │                     │   Trimmer   │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use visuotactile_align::{BatchRunner, Config};
//!
//! let config = Config::load_default().expect("Failed to load config");
//! let runner = BatchRunner::new(config).expect("Invalid config");
//!
//! let report = runner.run().expect("Batch run failed");
//! for outcome in report.skipped() {
//!     println!("skipped {}", outcome.group);
//! }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod report;
pub mod store;

// Re-export key types at crate root for convenience
pub use collector::{Recorder, Snapshot, StopFlag};
pub use config::{AuxiliaryStream, Config, MarkerConfig, StreamSource};
pub use core::{
    find_nearest, BatchRunner, GraspEventTrimmer, ReferenceAugmenter, StreamFusionEngine,
};
pub use report::{GroupOutcome, RunReport, RunStats};
pub use store::{RecordStore, StreamLayout, Timestamp, TimestampedRecord};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
