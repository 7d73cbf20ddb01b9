//! Timestamped record types shared by every stream.
//!
//! A record is an opaque key-value payload plus the millisecond timestamp it
//! was captured at. The payload is never interpreted by the alignment code;
//! fusion only adds sibling fields to it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Field name to value mapping carried by a record.
pub type Payload = Map<String, Value>;

/// File extension of a persisted record.
pub const RECORD_EXTENSION: &str = "json";

/// Anything that sits on a stream's timeline.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

/// One captured sample of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    /// Capture time in milliseconds
    pub timestamp: Timestamp,
    /// Stream-specific fields (images, tactile arrays, poses, ...)
    pub payload: Payload,
}

impl TimestampedRecord {
    pub fn new(timestamp: Timestamp, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// Look up a payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Add or replace a payload field. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.payload.insert(key.into(), value)
    }

    /// Consume the record, keeping only its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl Timestamped for TimestampedRecord {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl<T> Timestamped for (Timestamp, T) {
    fn timestamp(&self) -> Timestamp {
        self.0
    }
}

/// Parse a record file stem ("1745655532229") into a timestamp.
pub fn parse_timestamp_name(stem: &str) -> Option<Timestamp> {
    let stem = stem.trim();
    if stem.is_empty() {
        return None;
    }
    stem.parse().ok()
}

/// File name used to persist a record with the given timestamp.
pub fn record_file_name(timestamp: Timestamp) -> String {
    format!("{timestamp}.{RECORD_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_name() {
        assert_eq!(parse_timestamp_name("1745655532229"), Some(1_745_655_532_229));
        assert_eq!(parse_timestamp_name("42"), Some(42));
        assert_eq!(parse_timestamp_name("1745655532229_1745655532230"), None);
        assert_eq!(parse_timestamp_name("grasp_time"), None);
        assert_eq!(parse_timestamp_name(""), None);
    }

    #[test]
    fn test_record_file_name() {
        assert_eq!(record_file_name(1000), "1000.json");
    }

    #[test]
    fn test_insert_augments_payload() {
        let mut record = TimestampedRecord::new(5, Payload::new());
        assert!(record.insert("pos", json!(33.25)).is_none());
        assert_eq!(record.get("pos"), Some(&json!(33.25)));
        assert_eq!(record.insert("pos", json!(1.0)), Some(json!(33.25)));
    }

    #[test]
    fn test_tuple_is_timestamped() {
        let pair: (Timestamp, &str) = (17, "pose");
        assert_eq!(pair.timestamp(), 17);
    }
}
