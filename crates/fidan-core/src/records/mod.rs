//! Finished-session records and their durable repository.

mod record;
mod repository;
mod validation;

pub use record::{decode_collection, encode_collection, DecodedCollection, Record, RecordKind, TreeSpecies};
pub use repository::{LoadReport, LoadSource, RecordRepository, RecordStats, BACKUP_KEY, PRIMARY_KEY};
pub use validation::{
    validate_records, IssueKind, RecoveryAction, RecoveryResult, Severity, ValidationIssue,
    ValidationResult,
};
