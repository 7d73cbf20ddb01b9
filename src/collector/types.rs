//! Snapshot types produced by acquisition loops.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::store::{Payload, Timestamp, TimestampedRecord};

/// Clock offset applied to tactile captures.
///
/// The tactile recorder stamps its samples 100 ms early to line up with the
/// camera exposure.
pub const TACTILE_CLOCK_OFFSET_MS: i64 = -100;

/// Current wall-clock time in epoch milliseconds, shifted by `offset_ms`.
pub fn now_millis(offset_ms: i64) -> Timestamp {
    Utc::now().timestamp_millis() + offset_ms
}

/// One immutable capture, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture time in epoch milliseconds
    pub timestamp: Timestamp,
    /// Captured fields
    pub payload: Payload,
}

impl Snapshot {
    pub fn new(timestamp: Timestamp, payload: Payload) -> Self {
        Self { timestamp, payload }
    }

    /// Stamp `payload` with the current time.
    pub fn now(payload: Payload, offset_ms: i64) -> Self {
        Self::new(now_millis(offset_ms), payload)
    }

    pub fn into_record(self) -> TimestampedRecord {
        TimestampedRecord::new(self.timestamp, self.payload)
    }
}

/// One line of a JSON-lines capture feed.
///
/// Lines without a timestamp are stamped on arrival.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestLine {
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    pub payload: Payload,
}

impl IngestLine {
    pub fn into_snapshot(self, offset_ms: i64) -> Snapshot {
        match self.timestamp {
            Some(timestamp) => Snapshot::new(timestamp, self.payload),
            None => Snapshot::now(self.payload, offset_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_now_millis_applies_offset() {
        let before = Utc::now().timestamp_millis();
        let shifted = now_millis(TACTILE_CLOCK_OFFSET_MS);
        let after = Utc::now().timestamp_millis();
        assert!(shifted >= before - 100 && shifted <= after - 100);
    }

    #[test]
    fn test_ingest_line_keeps_given_timestamp() {
        let line: IngestLine =
            serde_json::from_str(r#"{"timestamp": 1500, "payload": {"force": 2.5}}"#).unwrap();
        let snapshot = line.into_snapshot(TACTILE_CLOCK_OFFSET_MS);
        assert_eq!(snapshot.timestamp, 1500);

        let record = snapshot.into_record();
        assert_eq!(record.get("force"), Some(&json!(2.5)));
    }

    #[test]
    fn test_ingest_line_without_timestamp_is_stamped() {
        let line: IngestLine = serde_json::from_str(r#"{"payload": {}}"#).unwrap();
        let before = Utc::now().timestamp_millis();
        let snapshot = line.into_snapshot(0);
        assert!(snapshot.timestamp >= before);
    }
}
