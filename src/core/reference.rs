//! Reference-frame augmentation of fused records.
//!
//! Tactile arrays are easier to interpret relative to the sensor's resting
//! state. The first fused record of an experiment that carries every
//! reference field is taken as the baseline, and each record is rewritten
//! with a `<field>_ref` copy of it next to its own reading.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::batch::list_experiment_groups;
use crate::store::{RecordStore, StoreError, TimestampedRecord};

/// Errors raised during augmentation.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("no record in {dir} carries '{sub_key}' fields {fields:?}")]
    NoBaseline {
        dir: PathBuf,
        sub_key: String,
        fields: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts of one augmentation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AugmentOutcome {
    pub written: usize,
    pub skipped: usize,
}

/// Adds baseline copies of selected sub-payload fields to every record.
#[derive(Debug, Clone)]
pub struct ReferenceAugmenter {
    sub_key: String,
    fields: Vec<String>,
}

impl Default for ReferenceAugmenter {
    fn default() -> Self {
        Self::new("tac_data", vec!["P1".to_string(), "P2".to_string()])
    }
}

impl ReferenceAugmenter {
    pub fn new(sub_key: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            sub_key: sub_key.into(),
            fields,
        }
    }

    /// Key the baseline of `field` is stored under.
    pub fn reference_key(field: &str) -> String {
        format!("{field}_ref")
    }

    /// Augment one fused store, writing the result to `output_dir`.
    pub fn augment<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_dir: P,
        output_dir: Q,
    ) -> Result<AugmentOutcome, ReferenceError> {
        let input_dir = input_dir.as_ref();
        let output_dir = output_dir.as_ref();
        let store = RecordStore::load(input_dir)?;

        let baseline = store
            .records()
            .iter()
            .find_map(|r| self.reference_fields(r))
            .ok_or_else(|| ReferenceError::NoBaseline {
                dir: input_dir.to_path_buf(),
                sub_key: self.sub_key.clone(),
                fields: self.fields.clone(),
            })?;

        let mut outcome = AugmentOutcome::default();
        for record in store.records() {
            if self.reference_fields(record).is_none() {
                tracing::warn!(
                    "Record {} in {} lacks '{}' fields {:?}, skipping",
                    record.timestamp,
                    input_dir.display(),
                    self.sub_key,
                    self.fields
                );
                outcome.skipped += 1;
                continue;
            }

            let mut augmented = record.clone();
            if let Some(Value::Object(sub)) = augmented.payload.get_mut(&self.sub_key) {
                for (field, value) in &baseline {
                    sub.insert(Self::reference_key(field), value.clone());
                }
            }
            RecordStore::write(output_dir, &augmented)?;
            outcome.written += 1;
        }

        Ok(outcome)
    }

    /// Augment every experiment group under `input_base`.
    ///
    /// Groups without any usable baseline are logged and reported as `None`.
    pub fn augment_groups<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_base: P,
        output_base: Q,
    ) -> Result<Vec<(String, Option<AugmentOutcome>)>, ReferenceError> {
        let input_base = input_base.as_ref();
        let output_base = output_base.as_ref();
        let groups =
            list_experiment_groups(input_base).map_err(|e| StoreError::io(input_base, e))?;

        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            match self.augment(input_base.join(&group), output_base.join(&group)) {
                Ok(outcome) => results.push((group, Some(outcome))),
                Err(e @ ReferenceError::NoBaseline { .. }) => {
                    tracing::warn!("Experiment {group} skipped: {e}");
                    results.push((group, None));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// The reference fields of a record, if it has all of them.
    fn reference_fields(&self, record: &TimestampedRecord) -> Option<Map<String, Value>> {
        let sub = record.get(&self.sub_key)?.as_object()?;
        self.fields
            .iter()
            .map(|field| sub.get(field).map(|v| (field.clone(), v.clone())))
            .collect()
    }
}
