//! Record type and its persisted JSON form.
//!
//! A stored collection is a JSON array. Entries are decoded one at a time so
//! that a single malformed entry is dropped instead of failing the whole load.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordDecodeError;

/// Species of a tree planted by a focus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeSpecies {
    Sapling,
    Oak,
    Pine,
    Cherry,
}

/// Category of a record, with the fields specific to that category.
///
/// Encoded inline with the record under a `category` tag. Unknown tags fail
/// decoding for that entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RecordKind {
    /// A plain focus session.
    #[default]
    Focus,
    /// A session that grew a tree.
    Tree { species: TreeSpecies },
    /// A session reported by a paired watch.
    Watch {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

/// Immutable outcome of a finished or abandoned session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecordDto", into = "RecordDto")]
pub struct Record {
    pub id: String,
    pub duration_millis: i64,
    pub completed_date: DateTime<Utc>,
    pub was_completed: bool,
    pub planted_date: DateTime<Utc>,
    /// Insertion position assigned by the repository; 0 until stored.
    pub position: u64,
    pub kind: RecordKind,
}

impl Record {
    /// Build an unstored record. Timestamps are truncated to milliseconds,
    /// the precision they are persisted with.
    pub fn new(
        id: impl Into<String>,
        duration_millis: i64,
        planted_date: DateTime<Utc>,
        completed_date: DateTime<Utc>,
        was_completed: bool,
        kind: RecordKind,
    ) -> Self {
        Self {
            id: id.into(),
            duration_millis,
            completed_date: completed_date.trunc_subsecs(3),
            was_completed,
            planted_date: planted_date.trunc_subsecs(3),
            position: 0,
            kind,
        }
    }

    /// Key used to de-duplicate records during recovery.
    pub fn identity(&self) -> (&str, i64) {
        (&self.id, self.completed_date.timestamp_millis())
    }
}

/// Wire shape of a stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordDto {
    id: String,
    duration_millis: i64,
    completed_date_millis: i64,
    was_completed: bool,
    planted_date_millis: i64,
    #[serde(default)]
    position: u64,
    #[serde(flatten)]
    kind: RecordKind,
}

impl From<Record> for RecordDto {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            duration_millis: record.duration_millis,
            completed_date_millis: record.completed_date.timestamp_millis(),
            was_completed: record.was_completed,
            planted_date_millis: record.planted_date.timestamp_millis(),
            position: record.position,
            kind: record.kind,
        }
    }
}

impl TryFrom<RecordDto> for Record {
    type Error = RecordDecodeError;

    fn try_from(dto: RecordDto) -> Result<Self, Self::Error> {
        Ok(Self {
            id: dto.id,
            duration_millis: dto.duration_millis,
            completed_date: millis_to_utc("completedDateMillis", dto.completed_date_millis)?,
            was_completed: dto.was_completed,
            planted_date: millis_to_utc("plantedDateMillis", dto.planted_date_millis)?,
            position: dto.position,
            kind: dto.kind,
        })
    }
}

fn millis_to_utc(field: &'static str, value: i64) -> Result<DateTime<Utc>, RecordDecodeError> {
    DateTime::from_timestamp_millis(value)
        .ok_or(RecordDecodeError::TimestampOutOfRange { field, value })
}

/// Result of decoding a stored collection entry by entry.
#[derive(Debug, Default)]
pub struct DecodedCollection {
    pub records: Vec<Record>,
    /// `(index, reason)` for every entry that was dropped.
    pub dropped: Vec<(usize, RecordDecodeError)>,
}

/// Decode a stored JSON array.
///
/// # Errors
/// Fails only when the payload is not a JSON array at all; malformed entries
/// are reported in [`DecodedCollection::dropped`].
pub fn decode_collection(raw: &str) -> Result<DecodedCollection, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut decoded = DecodedCollection::default();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Record>(entry) {
            Ok(record) => decoded.records.push(record),
            Err(e) => decoded
                .dropped
                .push((index, RecordDecodeError::Malformed(e.to_string()))),
        }
    }
    Ok(decoded)
}

pub fn encode_collection(records: &[Record]) -> Result<String, serde_json::Error> {
    serde_json::to_string(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Record {
        let planted = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let completed = Utc.timestamp_millis_opt(1_700_001_500_123).unwrap();
        Record::new(
            "r-1",
            1_500_000,
            planted,
            completed,
            true,
            RecordKind::Tree {
                species: TreeSpecies::Oak,
            },
        )
    }

    #[test]
    fn encodes_flat_wire_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], "r-1");
        assert_eq!(json["durationMillis"], 1_500_000);
        assert_eq!(json["completedDateMillis"], 1_700_001_500_123i64);
        assert_eq!(json["plantedDateMillis"], 1_700_000_000_123i64);
        assert_eq!(json["wasCompleted"], true);
        assert_eq!(json["category"], "tree");
        assert_eq!(json["species"], "oak");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"[{"id":"a","durationMillis":10,"completedDateMillis":1000,
            "wasCompleted":false,"plantedDateMillis":500,"category":"focus",
            "coins":12,"theme":"forest"}]"#;
        let decoded = decode_collection(raw).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.dropped.is_empty());
        assert_eq!(decoded.records[0].kind, RecordKind::Focus);
    }

    #[test]
    fn bad_entries_are_dropped_individually() {
        let raw = r#"[
            {"id":"ok","durationMillis":10,"completedDateMillis":1000,"wasCompleted":true,"plantedDateMillis":500,"category":"focus"},
            {"id":"no-duration","completedDateMillis":1000,"wasCompleted":true,"plantedDateMillis":500,"category":"focus"},
            {"id":"alien","durationMillis":10,"completedDateMillis":1000,"wasCompleted":true,"plantedDateMillis":500,"category":"spaceship"},
            {"id":"baobab","durationMillis":10,"completedDateMillis":1000,"wasCompleted":true,"plantedDateMillis":500,"category":"tree","species":"baobab"}
        ]"#;
        let decoded = decode_collection(raw).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].id, "ok");
        let indexes: Vec<usize> = decoded.dropped.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    #[test]
    fn non_array_payload_is_an_error() {
        assert!(decode_collection("{\"id\":1}").is_err());
        assert!(decode_collection("not json").is_err());
    }

    #[test]
    fn default_kind_is_focus() {
        assert_eq!(RecordKind::default(), RecordKind::Focus);
    }

    #[test]
    fn watch_kind_uses_camel_case_device_id() {
        let mut record = sample();
        record.kind = RecordKind::Watch {
            device_id: "W1".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["category"], "watch");
        assert_eq!(json["deviceId"], "W1");
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn new_truncates_to_millis() {
        let now = Utc::now();
        let record = Record::new("x", 0, now, now, false, RecordKind::Focus);
        assert_eq!(record.completed_date.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
