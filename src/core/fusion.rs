//! Multi-stream fusion against a driving stream.
//!
//! Every driving record is matched against each auxiliary stream with its
//! own tolerance. A miss on a required stream drops the driving record; a
//! miss on an optional stream only omits that stream's sub-payload. The fused
//! record keeps the driving timestamp.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::config::{AuxiliaryStream, Config};
use crate::core::matcher::{find_nearest, Match};
use crate::store::{RecordStore, StoreError, TimestampedRecord};

/// Errors raised while fusing streams.
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("required auxiliary stream '{0}' is missing")]
    MissingStream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which streams are matched and how the fused payload is keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionPolicy {
    /// Name of the driving stream
    pub driving_stream: String,
    /// Auxiliary streams in the order they are matched
    pub auxiliary: Vec<AuxiliaryStream>,
    /// Prefix prepended to every auxiliary output key
    pub output_key_prefix: String,
    /// Copy the driving timestamp into the payload under this key
    pub driving_timestamp_key: Option<String>,
}

impl FusionPolicy {
    pub fn new(driving_stream: impl Into<String>, auxiliary: Vec<AuxiliaryStream>) -> Self {
        Self {
            driving_stream: driving_stream.into(),
            auxiliary,
            output_key_prefix: String::new(),
            driving_timestamp_key: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            driving_stream: config.driving.name.clone(),
            auxiliary: config.auxiliary.clone(),
            output_key_prefix: config.output_key_prefix.clone(),
            driving_timestamp_key: config.driving_timestamp_key.clone(),
        }
    }
}

/// Per-stream matching counters of one fusion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMatchStats {
    pub stream: String,
    pub matched: usize,
    pub missed: usize,
    /// Skew of every accepted match, in driving order
    pub skews_ms: Vec<u64>,
}

/// Result of fusing one experiment group.
#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    /// Fused records, ascending by driving timestamp
    pub records: Vec<TimestampedRecord>,
    /// Driving records dropped for lack of a required match
    pub dropped: usize,
    /// Matching counters, one per auxiliary stream
    pub streams: Vec<StreamMatchStats>,
}

impl FusionOutcome {
    pub fn fused_count(&self) -> usize {
        self.records.len()
    }
}

/// Aligns auxiliary streams onto a driving stream.
#[derive(Debug, Clone)]
pub struct StreamFusionEngine {
    policy: FusionPolicy,
}

impl StreamFusionEngine {
    pub fn new(policy: FusionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FusionPolicy {
        &self.policy
    }

    /// Fuse in memory.
    ///
    /// `auxiliary` maps stream names to their loaded stores. A required
    /// stream absent from the map is an error; an absent optional stream
    /// behaves like an empty one.
    pub fn fuse(
        &self,
        driving: &RecordStore,
        auxiliary: &HashMap<String, RecordStore>,
    ) -> Result<FusionOutcome, FusionError> {
        let empty = RecordStore::new();
        let mut streams = Vec::with_capacity(self.policy.auxiliary.len());
        for aux in &self.policy.auxiliary {
            match auxiliary.get(aux.name()) {
                Some(store) => streams.push((aux, store)),
                None if aux.required => return Err(FusionError::MissingStream(aux.name().to_string())),
                None => streams.push((aux, &empty)),
            }
        }

        let mut outcome = FusionOutcome {
            records: Vec::with_capacity(driving.len()),
            dropped: 0,
            streams: streams
                .iter()
                .map(|(aux, _)| StreamMatchStats {
                    stream: aux.name().to_string(),
                    ..Default::default()
                })
                .collect(),
        };

        for record in driving.records() {
            let mut matches = Vec::with_capacity(streams.len());
            for ((aux, store), stats) in streams.iter().zip(outcome.streams.iter_mut()) {
                let found = find_nearest(record.timestamp, store.records(), aux.tolerance_ms)
                    .and_then(|m| self.embedded_value(aux, &m).map(|value| (m, value)));

                match &found {
                    Some((m, _)) => {
                        stats.matched += 1;
                        stats.skews_ms.push(m.skew_ms);
                    }
                    None => stats.missed += 1,
                }
                matches.push((*aux, found));
            }

            if let Some((aux, _)) = matches.iter().find(|(aux, m)| aux.required && m.is_none()) {
                tracing::debug!(
                    "Dropping driving record {}: no '{}' match within {} ms",
                    record.timestamp,
                    aux.name(),
                    aux.tolerance_ms
                );
                outcome.dropped += 1;
                continue;
            }

            outcome.records.push(self.assemble(record, matches));
        }

        Ok(outcome)
    }

    /// Fuse and write the result into a fresh output directory.
    ///
    /// Record files already in `output_dir` are removed first so stale
    /// records from earlier runs never mix with this one.
    pub fn fuse_into_dir<P: AsRef<Path>>(
        &self,
        driving: &RecordStore,
        auxiliary: &HashMap<String, RecordStore>,
        output_dir: P,
    ) -> Result<FusionOutcome, FusionError> {
        let output_dir = output_dir.as_ref();
        let outcome = self.fuse(driving, auxiliary)?;

        let stale = RecordStore::clear(output_dir)?;
        if stale > 0 {
            tracing::info!(
                "Removed {stale} stale records from {}",
                output_dir.display()
            );
        }
        std::fs::create_dir_all(output_dir).map_err(|e| StoreError::io(output_dir, e))?;

        for record in &outcome.records {
            RecordStore::write(output_dir, record)?;
        }

        Ok(outcome)
    }

    /// Value to embed for a match, or `None` when the unwrapped field is absent.
    fn embedded_value(
        &self,
        aux: &AuxiliaryStream,
        m: &Match<'_, TimestampedRecord>,
    ) -> Option<Value> {
        match &aux.unwrap_field {
            Some(field) => {
                let value = m.candidate.get(field).cloned();
                if value.is_none() {
                    tracing::debug!(
                        "Record {} of '{}' has no field '{field}'",
                        m.candidate.timestamp,
                        aux.name()
                    );
                }
                value
            }
            None => Some(Value::Object(m.candidate.payload.clone())),
        }
    }

    fn assemble(
        &self,
        driving: &TimestampedRecord,
        matches: Vec<(&AuxiliaryStream, Option<(Match<'_, TimestampedRecord>, Value)>)>,
    ) -> TimestampedRecord {
        let mut fused = driving.clone();

        if let Some(key) = &self.policy.driving_timestamp_key {
            fused.insert(key.clone(), Value::from(driving.timestamp));
        }

        for (aux, found) in matches {
            let Some((m, value)) = found else {
                continue;
            };
            let key = aux.output_key(&self.policy.output_key_prefix);
            if aux.record_match_timestamp {
                fused.insert(format!("{key}_timestamp"), Value::from(m.timestamp()));
            }
            if fused.insert(key.clone(), value).is_some() {
                tracing::debug!("Driving field '{key}' replaced by '{}' match", aux.name());
            }
        }

        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamSource;
    use crate::store::{Payload, Timestamp};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(timestamp: Timestamp, field: &str, value: Value) -> TimestampedRecord {
        let mut payload = Payload::new();
        payload.insert(field.to_string(), value);
        TimestampedRecord::new(timestamp, payload)
    }

    /// Ten frames every 100 ms from t=1000; tactile covers only the first six.
    fn frames_and_tactile() -> (RecordStore, RecordStore) {
        let vision = RecordStore::from_records(
            (0..10).map(|i| record(1000 + i * 100, "color_image", json!([i]))),
        );
        let tactile = RecordStore::from_records(
            (0..6).map(|i| record(1000 + i * 100 + 7, "force", json!(i as f64))),
        );
        (vision, tactile)
    }

    fn tactile_stream(required: bool) -> AuxiliaryStream {
        let mut aux = AuxiliaryStream::required(StreamSource::new("tactile", "tac"), 20);
        aux.required = required;
        aux.output_key = Some("tac_data".to_string());
        aux
    }

    fn streams(tactile: RecordStore) -> HashMap<String, RecordStore> {
        HashMap::from([("tactile".to_string(), tactile)])
    }

    #[test]
    fn test_required_stream_drops_unmatched() {
        let (vision, tactile) = frames_and_tactile();
        let engine = StreamFusionEngine::new(FusionPolicy::new("vision", vec![tactile_stream(true)]));

        let outcome = engine.fuse(&vision, &streams(tactile)).unwrap();
        assert_eq!(outcome.fused_count(), 6);
        assert_eq!(outcome.dropped, 4);
        assert!(outcome.records.iter().all(|r| r.get("tac_data").is_some()));
        assert_eq!(outcome.records[5].timestamp, 1500);
        assert_eq!(outcome.streams[0].matched, 6);
        assert_eq!(outcome.streams[0].missed, 4);
        assert!(outcome.streams[0].skews_ms.iter().all(|&s| s == 7));
    }

    #[test]
    fn test_optional_stream_omits_sub_payload() {
        let (vision, tactile) = frames_and_tactile();
        let engine =
            StreamFusionEngine::new(FusionPolicy::new("vision", vec![tactile_stream(false)]));

        let outcome = engine.fuse(&vision, &streams(tactile)).unwrap();
        assert_eq!(outcome.fused_count(), 10);
        assert_eq!(outcome.dropped, 0);
        let with_tactile = outcome
            .records
            .iter()
            .filter(|r| r.get("tac_data").is_some())
            .count();
        assert_eq!(with_tactile, 6);
        assert!(outcome.records[9].get("tac_data").is_none());
        assert_eq!(outcome.records[9].get("color_image"), Some(&json!([9])));
    }

    #[test]
    fn test_fused_record_keeps_driving_timestamp_and_payload() {
        let (vision, tactile) = frames_and_tactile();
        let mut policy = FusionPolicy::new("vision", vec![tactile_stream(true)]);
        policy.driving_timestamp_key = Some("vis_timestamp".to_string());
        policy.auxiliary[0].record_match_timestamp = true;
        let engine = StreamFusionEngine::new(policy);

        let outcome = engine.fuse(&vision, &streams(tactile)).unwrap();
        let first = &outcome.records[0];
        assert_eq!(first.timestamp, 1000);
        assert_eq!(first.get("vis_timestamp"), Some(&json!(1000)));
        assert_eq!(first.get("tac_data_timestamp"), Some(&json!(1007)));
        assert_eq!(first.get("color_image"), Some(&json!([0])));
        assert_eq!(first.get("tac_data"), Some(&json!({"force": 0.0})));
    }

    #[test]
    fn test_every_required_stream_must_match() {
        let (vision, tactile) = frames_and_tactile();
        let trajectory = RecordStore::from_records(
            (0..10)
                .filter(|i| i % 2 == 0)
                .map(|i| record(1000 + i * 100, "O_T_EE", json!([i, 0, 0]))),
        );
        let mut traj = AuxiliaryStream::required(StreamSource::new("trajectory", "traj"), 20);
        traj.unwrap_field = Some("O_T_EE".to_string());
        let engine = StreamFusionEngine::new(FusionPolicy::new(
            "vision",
            vec![tactile_stream(true), traj],
        ));

        let mut aux = streams(tactile);
        aux.insert("trajectory".to_string(), trajectory);
        let outcome = engine.fuse(&vision, &aux).unwrap();

        let kept: Vec<_> = outcome.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(kept, vec![1000, 1200, 1400]);
        assert_eq!(outcome.records[1].get("trajectory"), Some(&json!([2, 0, 0])));
    }

    #[test]
    fn test_missing_unwrap_field_counts_as_miss() {
        let vision = RecordStore::from_records(vec![record(1000, "depth_image", json!([]))]);
        let trajectory = RecordStore::from_records(vec![record(1000, "q", json!([0.0]))]);
        let mut traj = AuxiliaryStream::required(StreamSource::new("trajectory", "traj"), 20);
        traj.unwrap_field = Some("O_T_EE".to_string());
        let engine = StreamFusionEngine::new(FusionPolicy::new("vision", vec![traj]));

        let aux = HashMap::from([("trajectory".to_string(), trajectory)]);
        let outcome = engine.fuse(&vision, &aux).unwrap();
        assert_eq!(outcome.fused_count(), 0);
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_missing_required_store_is_error() {
        let (vision, _) = frames_and_tactile();
        let engine = StreamFusionEngine::new(FusionPolicy::new("vision", vec![tactile_stream(true)]));
        let err = engine.fuse(&vision, &HashMap::new()).unwrap_err();
        assert!(matches!(err, FusionError::MissingStream(name) if name == "tactile"));

        let engine =
            StreamFusionEngine::new(FusionPolicy::new("vision", vec![tactile_stream(false)]));
        assert_eq!(engine.fuse(&vision, &HashMap::new()).unwrap().fused_count(), 10);
    }

    #[test]
    fn test_fuse_into_dir_replaces_previous_output() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("0001");
        RecordStore::write(&out, &record(42, "stale", json!(true))).unwrap();
        std::fs::write(out.join("README.txt"), "keep me").unwrap();

        let (vision, tactile) = frames_and_tactile();
        let engine = StreamFusionEngine::new(FusionPolicy::new("vision", vec![tactile_stream(true)]));
        let outcome = engine.fuse_into_dir(&vision, &streams(tactile), &out).unwrap();

        let written = RecordStore::load(&out).unwrap();
        assert_eq!(written.len(), outcome.fused_count());
        assert_eq!(written.records(), outcome.records.as_slice());
        assert!(out.join("README.txt").exists());
    }
}
