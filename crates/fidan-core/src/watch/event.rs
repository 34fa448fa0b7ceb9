use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::RecordDecodeError;
use crate::records::{Record, RecordKind};

/// A completion notice from a paired watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    /// Unix seconds when the remote session finished.
    pub timestamp: i64,
    pub duration_seconds: i32,
    pub device_id: String,
}

impl WatchEvent {
    pub fn new(timestamp: i64, duration_seconds: i32, device_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            duration_seconds,
            device_id: device_id.into(),
        }
    }

    /// Deduplication key.
    pub fn key(&self) -> (i64, &str) {
        (self.timestamp, &self.device_id)
    }

    /// Convert into a completed `watch` record ending at `timestamp`.
    ///
    /// The id is derived from the dedup key, so the same event always maps to
    /// the same record identity.
    pub fn to_record(&self) -> Result<Record, RecordDecodeError> {
        let completed = DateTime::from_timestamp(self.timestamp, 0).ok_or(
            RecordDecodeError::TimestampOutOfRange {
                field: "timestamp",
                value: self.timestamp,
            },
        )?;
        let duration_millis = i64::from(self.duration_seconds) * 1_000;
        let planted = completed
            .checked_sub_signed(chrono::Duration::milliseconds(duration_millis.max(0)))
            .ok_or(RecordDecodeError::TimestampOutOfRange {
                field: "timestamp",
                value: self.timestamp,
            })?;
        Ok(Record::new(
            format!("watch-{}-{}", self.device_id, self.timestamp),
            duration_millis,
            planted,
            completed,
            true,
            RecordKind::Watch {
                device_id: self.device_id.clone(),
            },
        ))
    }
}
