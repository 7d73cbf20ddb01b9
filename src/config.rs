//! Configuration for alignment runs.
//!
//! Every path and matching parameter is carried here and handed to the
//! components at construction; nothing reads process-wide path constants.
//! All tolerances are in milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::{StreamLayout, GRASP_MARKER_FILE};

/// Tolerance above which a configuration is probably mixing units.
pub const SUSPICIOUS_TOLERANCE_MS: u64 = 10_000;

/// Default matching tolerance.
pub const DEFAULT_TOLERANCE_MS: u64 = 100;

/// Main configuration for fusion and trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stream whose timestamps define the fused timeline
    pub driving: StreamSource,

    /// Streams matched against the driving stream
    pub auxiliary: Vec<AuxiliaryStream>,

    /// Base directory for fused output (one sub-directory per experiment)
    pub output_dir: PathBuf,

    /// Prefix prepended to every auxiliary output key
    #[serde(default)]
    pub output_key_prefix: String,

    /// Key under which the driving timestamp is copied into the fused payload
    #[serde(default)]
    pub driving_timestamp_key: Option<String>,

    /// Event marker used as a trim cutoff
    #[serde(default)]
    pub marker: Option<MarkerConfig>,

    /// Whether fused records before the marker are removed
    pub trim: bool,

    /// Number of experiment groups processed concurrently
    pub jobs: usize,

    /// Where to write the run report, if anywhere
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("data_save");

        Self {
            driving: StreamSource::new("vision", data_dir.join("vis_data")),
            auxiliary: vec![
                AuxiliaryStream {
                    source: StreamSource::new("tactile", data_dir.join("tac_data")),
                    tolerance_ms: DEFAULT_TOLERANCE_MS,
                    required: true,
                    output_key: Some("tac_data".to_string()),
                    unwrap_field: None,
                    record_match_timestamp: false,
                },
                AuxiliaryStream {
                    source: StreamSource {
                        name: "trajectory".to_string(),
                        base_dir: data_dir.join("traj_data"),
                        layout: StreamLayout::Trajectory,
                    },
                    tolerance_ms: DEFAULT_TOLERANCE_MS,
                    required: true,
                    output_key: Some("O_T_EE".to_string()),
                    unwrap_field: Some("O_T_EE".to_string()),
                    record_match_timestamp: false,
                },
            ],
            output_dir: data_dir.join("combined_data"),
            output_key_prefix: String::new(),
            driving_timestamp_key: Some("vis_timestamp".to_string()),
            marker: Some(MarkerConfig::default()),
            trim: true,
            jobs: 1,
            report_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from the default location, falling back to defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the default configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("visuotactile-align")
            .join("config.json")
    }

    /// Look up a configured stream (driving or auxiliary) by name.
    pub fn stream(&self, name: &str) -> Option<&StreamSource> {
        if self.driving.name == name {
            return Some(&self.driving);
        }
        self.auxiliary
            .iter()
            .map(|aux| &aux.source)
            .find(|source| source.name == name)
    }

    /// Full marker file path for an experiment group, if a marker is configured.
    pub fn marker_path(&self, group: &str) -> Option<PathBuf> {
        let marker = self.marker.as_ref()?;
        let stream = self.stream(&marker.stream)?;
        Some(stream.group_dir(group).join(&marker.file_name))
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auxiliary.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one auxiliary stream is required".to_string(),
            ));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs must be at least 1".to_string()));
        }

        let mut names = HashSet::new();
        names.insert(self.driving.name.as_str());
        for aux in &self.auxiliary {
            if !names.insert(aux.source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "stream name '{}' is used twice",
                    aux.source.name
                )));
            }
        }

        let mut keys = HashSet::new();
        for aux in &self.auxiliary {
            let key = aux.output_key(&self.output_key_prefix);
            if self.driving_timestamp_key.as_deref() == Some(key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "output key '{key}' collides with the driving timestamp key"
                )));
            }
            if !keys.insert(key.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "output key '{key}' is used twice"
                )));
            }
            if aux.tolerance_ms >= SUSPICIOUS_TOLERANCE_MS {
                tracing::warn!(
                    "Tolerance for '{}' is {} ms; all tolerances are milliseconds",
                    aux.source.name,
                    aux.tolerance_ms
                );
            }
        }

        if let Some(marker) = &self.marker {
            if self.stream(&marker.stream).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "marker stream '{}' is not configured",
                    marker.stream
                )));
            }
        }

        Ok(())
    }
}

/// Where a stream lives and how its files are laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSource {
    /// Stream name used in logs and reports
    pub name: String,
    /// Base directory holding one sub-directory per experiment
    pub base_dir: PathBuf,
    /// On-disk layout
    #[serde(default)]
    pub layout: StreamLayout,
}

impl StreamSource {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            layout: StreamLayout::PerRecord,
        }
    }

    /// Directory of one experiment group of this stream.
    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.base_dir.join(group)
    }
}

/// An auxiliary stream and its matching policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryStream {
    pub source: StreamSource,
    /// Maximum accepted |driving - auxiliary| in milliseconds
    pub tolerance_ms: u64,
    /// Whether a driving record without a match is dropped
    pub required: bool,
    /// Key of the matched sub-payload; defaults to the stream name
    #[serde(default)]
    pub output_key: Option<String>,
    /// Embed only this field of the matched payload instead of all of it
    #[serde(default)]
    pub unwrap_field: Option<String>,
    /// Also store the matched record's timestamp under `<key>_timestamp`
    #[serde(default)]
    pub record_match_timestamp: bool,
}

impl AuxiliaryStream {
    /// A required per-record stream embedded under its own name.
    pub fn required(source: StreamSource, tolerance_ms: u64) -> Self {
        Self {
            source,
            tolerance_ms,
            required: true,
            output_key: None,
            unwrap_field: None,
            record_match_timestamp: false,
        }
    }

    /// An optional per-record stream embedded under its own name.
    pub fn optional(source: StreamSource, tolerance_ms: u64) -> Self {
        Self {
            required: false,
            ..Self::required(source, tolerance_ms)
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Final payload key for this stream.
    pub fn output_key(&self, prefix: &str) -> String {
        let key = self.output_key.as_deref().unwrap_or(&self.source.name);
        format!("{prefix}{key}")
    }
}

/// Location of the event marker inside an experiment group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    /// Stream whose group directory holds the marker file
    pub stream: String,
    /// Marker file name
    pub file_name: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            stream: "tactile".to_string(),
            file_name: GRASP_MARKER_FILE.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
