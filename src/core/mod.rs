//! Core alignment functionality.
//!
//! This module contains:
//! - Nearest-timestamp matching within a tolerance
//! - Fusion of auxiliary streams onto a driving stream
//! - Trimming of fused records at an event marker
//! - Reference-frame augmentation of fused tactile data
//! - Batch processing of experiment groups

pub mod batch;
pub mod fusion;
pub mod matcher;
pub mod reference;
pub mod trim;

// Re-export commonly used types
pub use batch::{experiment_dir_name, list_experiment_groups, BatchError, BatchRunner};
pub use fusion::{FusionError, FusionOutcome, FusionPolicy, StreamFusionEngine, StreamMatchStats};
pub use matcher::{find_nearest, Match};
pub use reference::{AugmentOutcome, ReferenceAugmenter, ReferenceError};
pub use trim::{GraspEventTrimmer, TrimError};
