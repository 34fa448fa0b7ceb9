//! Integrity checks and recovery reporting for the record collection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::record::Record;

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    /// Unrecoverable. None of the built-in checks emit this.
    Critical,
}

/// What a validation finding is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    EmptyId,
    NegativeDuration { duration_millis: i64 },
    DuplicateId,
}

/// A data-quality finding. These are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub record_id: String,
    pub position: u64,
    pub severity: Severity,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub can_recover: bool,
}

/// Scan `records` for empty ids, negative durations and duplicate ids.
pub fn validate_records(records: &[Record]) -> ValidationResult {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for record in records {
        let issue = |severity: Severity, kind: IssueKind| ValidationIssue {
            record_id: record.id.clone(),
            position: record.position,
            severity,
            kind,
        };
        if record.id.trim().is_empty() {
            issues.push(issue(Severity::Error, IssueKind::EmptyId));
        } else if !seen.insert(record.id.as_str()) {
            issues.push(issue(Severity::Warning, IssueKind::DuplicateId));
        }
        if record.duration_millis < 0 {
            issues.push(issue(
                Severity::Error,
                IssueKind::NegativeDuration {
                    duration_millis: record.duration_millis,
                },
            ));
        }
    }

    let can_recover = !issues.iter().any(|i| i.severity == Severity::Critical);
    ValidationResult {
        is_valid: issues.is_empty(),
        issues,
        can_recover,
    }
}

/// Whether a single record may be retained by recovery.
pub fn is_retainable(record: &Record) -> bool {
    !record.id.trim().is_empty() && record.duration_millis >= 0
}

/// One step taken by [`RecordRepository::recover`](super::RecordRepository::recover).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Valid records were read from the backup key.
    RestoredFromBackup { count: usize },
    /// The backup key was missing or unreadable.
    BackupUnavailable { reason: String },
    /// The primary key could not be read or was not an array.
    PrimaryUnreadable { reason: String },
    /// A primary entry failed to decode.
    DroppedCorrupt { index: usize, reason: String },
    /// A decoded record failed validation.
    DroppedInvalid { record_id: String, reason: String },
    /// Records sharing an `(id, completedDate)` were collapsed.
    Deduplicated { removed: usize },
    /// The cleaned collection was written to primary and backup.
    Persisted { count: usize },
    /// Writing the cleaned collection failed; memory-fallback is active.
    PersistFailed { reason: String },
}

/// Summary of a recovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub was_successful: bool,
    pub recovered_records: Vec<Record>,
    pub lost_count: usize,
    pub actions: Vec<RecoveryAction>,
}
