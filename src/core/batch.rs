//! Batch processing of experiment groups.
//!
//! An experiment group is one capture session: a same-named sub-directory in
//! every stream's base directory. Each group is fused, written to its own
//! output directory and optionally trimmed at its event marker. A group
//! missing a required stream or its marker is skipped and reported; only
//! unexpected I/O failures stop the run.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::core::fusion::{FusionError, FusionPolicy, StreamFusionEngine};
use crate::core::trim::{GraspEventTrimmer, TrimError};
use crate::report::{
    create_shared_stats, GroupOutcome, GroupStatus, RunReport, SharedRunStats, SkewSummary,
    SkipReason,
};
use crate::store::{read_event_marker, MarkerError, RecordStore, StoreError};

/// Errors that abort a batch run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot list experiment groups in {path}: {source}")]
    ListGroups {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("experiment {group}: {source}")]
    Group {
        group: String,
        #[source]
        source: StoreError,
    },
}

/// Sub-directory names of `base`, sorted. Plain files are ignored.
pub fn list_experiment_groups<P: AsRef<Path>>(base: P) -> io::Result<Vec<String>> {
    let mut groups = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                groups.push(name.to_string());
            }
        }
    }
    groups.sort();
    Ok(groups)
}

/// Directory name for an experiment identifier: numbers are zero-padded to
/// four digits ("1" -> "0001"), anything else is used as given.
pub fn experiment_dir_name(experiment: &str) -> String {
    let trimmed = experiment.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{trimmed:0>4}")
    } else {
        trimmed.to_string()
    }
}

/// Runs fusion and trimming over experiment groups.
pub struct BatchRunner {
    config: Config,
    engine: StreamFusionEngine,
    stats: SharedRunStats,
}

impl BatchRunner {
    /// Create a runner; the configuration is validated first.
    pub fn new(config: Config) -> Result<Self, BatchError> {
        config.validate()?;
        let engine = StreamFusionEngine::new(FusionPolicy::from_config(&config));
        Ok(Self {
            config,
            engine,
            stats: create_shared_stats(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared counters, updated as groups finish.
    pub fn stats(&self) -> SharedRunStats {
        SharedRunStats::clone(&self.stats)
    }

    /// Process every experiment group found under the driving base directory.
    pub fn run(&self) -> Result<RunReport, BatchError> {
        let base = &self.config.driving.base_dir;
        let groups = list_experiment_groups(base).map_err(|source| BatchError::ListGroups {
            path: base.clone(),
            source,
        })?;
        tracing::info!("Found {} experiment groups in {}", groups.len(), base.display());
        self.run_groups(groups)
    }

    /// Process a single experiment (identifier is zero-padded when numeric).
    pub fn run_experiment(&self, experiment: &str) -> Result<RunReport, BatchError> {
        self.run_groups(vec![experiment_dir_name(experiment)])
    }

    /// Process the given groups, reporting them in name order.
    pub fn run_groups(&self, mut groups: Vec<String>) -> Result<RunReport, BatchError> {
        groups.sort();
        let jobs = self.config.jobs.max(1).min(groups.len().max(1));

        let mut results = if jobs == 1 {
            let mut results = Vec::with_capacity(groups.len());
            for group in groups {
                let result = self.process_group(&group);
                let failed = result.is_err();
                results.push((group, result));
                if failed {
                    break;
                }
            }
            results
        } else {
            self.process_parallel(groups, jobs)
        };

        results.sort_by(|a, b| a.0.cmp(&b.0));
        let mut outcomes = Vec::with_capacity(results.len());
        for (group, result) in results {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(source) => return Err(BatchError::Group { group, source }),
            }
        }

        Ok(RunReport::new(outcomes, &self.stats))
    }

    fn process_parallel(
        &self,
        groups: Vec<String>,
        jobs: usize,
    ) -> Vec<(String, Result<GroupOutcome, StoreError>)> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        for group in groups {
            // The receiver is alive until the scope below ends.
            let _ = sender.send(group);
        }
        drop(sender);

        let abort = AtomicBool::new(false);
        thread::scope(|scope| {
            let workers: Vec<_> = (0..jobs)
                .map(|_| {
                    let receiver = receiver.clone();
                    let abort = &abort;
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        for group in receiver.iter() {
                            if abort.load(Ordering::SeqCst) {
                                break;
                            }
                            let result = self.process_group(&group);
                            if result.is_err() {
                                abort.store(true, Ordering::SeqCst);
                            }
                            done.push((group, result));
                        }
                        done
                    })
                })
                .collect();

            workers
                .into_iter()
                .flat_map(|worker| match worker.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    /// Fuse and trim one experiment group.
    ///
    /// Missing streams and markers produce a skipped outcome; I/O failures
    /// are returned as errors.
    pub fn process_group(&self, group: &str) -> Result<GroupOutcome, StoreError> {
        let config = &self.config;

        let driving_dir = config.driving.group_dir(group);
        if !driving_dir.is_dir() {
            return Ok(self.skip(
                group,
                SkipReason::MissingStream {
                    stream: config.driving.name.clone(),
                },
            ));
        }

        let mut aux_dirs = Vec::with_capacity(config.auxiliary.len());
        for aux in &config.auxiliary {
            let dir = aux.source.group_dir(group);
            if dir.is_dir() {
                aux_dirs.push((aux, dir));
            } else if aux.required {
                return Ok(self.skip(
                    group,
                    SkipReason::MissingStream {
                        stream: aux.name().to_string(),
                    },
                ));
            } else {
                tracing::info!("Experiment {group}: no '{}' data, continuing without it", aux.name());
            }
        }

        // The marker only matters when it is going to be used.
        let marker_path = if config.trim {
            config.marker_path(group)
        } else {
            None
        };
        if let Some(path) = &marker_path {
            if let Err(e) = read_event_marker(path) {
                return self.skip_for_marker(group, e);
            }
        }

        let driving = config.driving.layout.load(&driving_dir)?;
        tracing::info!("Experiment {group}: {} '{}' records", driving.len(), config.driving.name);
        let mut malformed = driving.malformed_count();

        let mut auxiliary = HashMap::with_capacity(aux_dirs.len());
        for (aux, dir) in aux_dirs {
            let store = aux.source.layout.load(&dir)?;
            tracing::info!("Experiment {group}: {} '{}' records", store.len(), aux.name());
            malformed += store.malformed_count();
            auxiliary.insert(aux.name().to_string(), store);
        }

        let output_dir = config.output_dir.join(group);
        let fusion = match self.engine.fuse_into_dir(&driving, &auxiliary, &output_dir) {
            Ok(fusion) => fusion,
            Err(FusionError::Store(e)) => return Err(e),
            Err(FusionError::MissingStream(stream)) => {
                return Ok(self.skip(group, SkipReason::MissingStream { stream }))
            }
        };
        tracing::info!(
            "Experiment {group}: fused {} records, dropped {}",
            fusion.fused_count(),
            fusion.dropped
        );

        let mut removed = 0;
        if let Some(path) = marker_path {
            removed = match GraspEventTrimmer::new(path).trim(&output_dir) {
                Ok(removed) => removed,
                Err(TrimError::Store(e)) => return Err(e),
                Err(TrimError::MissingMarker(e)) => return self.skip_for_marker(group, e),
            };
        }

        self.stats.record_group_completed();
        self.stats.record_fused(fusion.fused_count() as u64);
        self.stats.record_dropped(fusion.dropped as u64);
        self.stats.record_removed(removed as u64);
        self.stats.record_malformed(malformed as u64);

        Ok(GroupOutcome {
            group: group.to_string(),
            status: GroupStatus::Completed {
                fused: fusion.fused_count(),
                dropped: fusion.dropped,
                removed,
                malformed,
            },
            streams: fusion.streams.iter().map(SkewSummary::from_stats).collect(),
        })
    }

    /// An absent, empty or unparsable marker skips the group; failing to
    /// read an existing one is an I/O error of the run.
    fn skip_for_marker(&self, group: &str, error: MarkerError) -> Result<GroupOutcome, StoreError> {
        match error {
            MarkerError::Io { path, source } => Err(StoreError::Io { path, source }),
            other => Ok(self.skip(
                group,
                SkipReason::MissingMarker {
                    detail: other.to_string(),
                },
            )),
        }
    }

    fn skip(&self, group: &str, reason: SkipReason) -> GroupOutcome {
        tracing::warn!("Experiment {group} skipped: {reason}");
        self.stats.record_group_skipped();
        GroupOutcome::skipped(group, reason)
    }

    /// Records left in a group's output directory.
    pub fn output_store(&self, group: &str) -> Result<RecordStore, StoreError> {
        RecordStore::load(self.config.output_dir.join(group))
    }
}
