//! Trajectory stream layout.
//!
//! The arm recorder saves one file per capture session holding the whole
//! trajectory: joint angles, end-effector poses and the wall-clock time of
//! every sample. For alignment each sample becomes its own record.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::record::{parse_timestamp_name, Payload, Timestamp, TimestampedRecord};
use crate::store::record_store::{record_files, RecordStore, Result, StoreError};

/// Payload key of the joint angles of a sample.
pub const JOINTS_KEY: &str = "q";

/// Payload key of the end-effector pose of a sample.
pub const POSE_KEY: &str = "O_T_EE";

/// Skill description written by the guide-mode recorder.
pub const GUIDE_MODE_SKILL: &str = "GuideMode";

/// On-disk trajectory file: `{"0": {"skill_description", "skill_state_dict"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryFile {
    #[serde(rename = "0")]
    pub skill: SkillEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_description: Option<String>,
    pub skill_state_dict: SkillState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillState {
    #[serde(default)]
    pub q: Vec<Value>,
    #[serde(rename = "O_T_EE")]
    pub o_t_ee: Vec<Value>,
    pub time_since_skill_started: Vec<SampleTime>,
}

/// Sample times were written either as integers or as decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleTime {
    Millis(i64),
    Text(String),
}

impl SampleTime {
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            SampleTime::Millis(ms) => Some(*ms),
            SampleTime::Text(text) => parse_timestamp_name(text),
        }
    }
}

/// One arm sample used to build trajectory files.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySample {
    pub timestamp: Timestamp,
    pub joints: Value,
    pub pose: Value,
}

impl TrajectoryFile {
    /// Assemble a guide-mode trajectory file from samples.
    pub fn from_samples(samples: &[TrajectorySample]) -> Self {
        Self {
            skill: SkillEntry {
                skill_description: Some(GUIDE_MODE_SKILL.to_string()),
                skill_state_dict: SkillState {
                    q: samples.iter().map(|s| s.joints.clone()).collect(),
                    o_t_ee: samples.iter().map(|s| s.pose.clone()).collect(),
                    time_since_skill_started: samples
                        .iter()
                        .map(|s| SampleTime::Text(s.timestamp.to_string()))
                        .collect(),
                },
            },
        }
    }

    /// Split the file into per-sample records.
    ///
    /// Pairs timestamps with poses index by index, stopping at the shorter of
    /// the two. Returns the records and the number of samples whose time
    /// could not be parsed.
    pub fn into_records(self) -> (Vec<TimestampedRecord>, usize) {
        let state = self.skill.skill_state_dict;
        let mut joints = state.q.into_iter();
        let mut records = Vec::with_capacity(state.o_t_ee.len());
        let mut malformed = 0;

        for (time, pose) in state.time_since_skill_started.into_iter().zip(state.o_t_ee) {
            let joint = joints.next();
            let Some(timestamp) = time.as_timestamp() else {
                malformed += 1;
                continue;
            };

            let mut payload = Payload::new();
            if let Some(joint) = joint {
                payload.insert(JOINTS_KEY.to_string(), joint);
            }
            payload.insert(POSE_KEY.to_string(), pose);
            records.push(TimestampedRecord::new(timestamp, payload));
        }

        (records, malformed)
    }
}

/// Write a trajectory file to `path`, creating parent directories.
pub fn write_trajectory(path: &Path, samples: &[TrajectorySample]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let file = TrajectoryFile::from_samples(samples);
    let bytes = serde_json::to_vec(&file).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|e| StoreError::io(path, e))
}

/// Read one trajectory file.
pub fn read_trajectory(path: &Path) -> Result<TrajectoryFile> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::malformed(path, format!("not a trajectory file: {e}")))
}

/// Load every trajectory file in `dir` as one merged, sorted store.
pub fn load_trajectory_dir<P: AsRef<Path>>(dir: P) -> Result<RecordStore> {
    let dir = dir.as_ref();
    let mut samples = Vec::new();
    let mut malformed = 0;

    for path in record_files(dir)? {
        match read_trajectory(&path) {
            Ok(file) => {
                let (records, bad) = file.into_records();
                if bad > 0 {
                    tracing::warn!(
                        "Skipping {bad} samples with unparsable times in {}",
                        path.display()
                    );
                }
                malformed += bad;
                samples.extend(records);
            }
            Err(e) if e.is_malformed() => {
                tracing::warn!("Skipping {e}");
                malformed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let mut store = RecordStore::from_records(samples);
    store.add_malformed(malformed);
    Ok(store)
}
