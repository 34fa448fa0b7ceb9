//! Core error types for fidan-core.
//!
//! Session errors are programmer errors surfaced synchronously to the host.
//! Storage errors are recovered locally by the repository and the watch
//! deduplicator (memory-fallback), so they rarely reach callers directly.

use std::path::PathBuf;
use thiserror::Error;

use crate::timer::SessionState;

/// Core error type for fidan-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Session state machine errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Key-value store errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Stored record could not be decoded
    #[error("Record decode error: {0}")]
    Decode(#[from] RecordDecodeError),
}

/// Errors returned by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad input, e.g. a non-positive target duration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not valid in the current state, including unknown or stale ids.
    #[error("Cannot {operation} session {session_id}: {}", describe_state(.state))]
    InvalidState {
        operation: &'static str,
        session_id: String,
        state: Option<SessionState>,
    },

    /// `start` was called while another session is still active.
    #[error("Session {active_id} is already active")]
    AlreadyActive { active_id: String },
}

fn describe_state(state: &Option<SessionState>) -> String {
    match state {
        Some(state) => format!("session is {state}"),
        None => "no such active session".to_string(),
    }
}

/// Key-value store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A read or write against the backend failed
    #[error("Store operation '{operation}' failed for key '{key}': {message}")]
    OperationFailed {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// The store is locked by another connection
    #[error("Store is locked")]
    Locked,

    /// Could not resolve the data directory
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl StoreError {
    pub(crate) fn operation(operation: &'static str, key: &str, err: impl ToString) -> Self {
        StoreError::OperationFailed {
            operation,
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Reasons a single stored record is rejected on read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordDecodeError {
    /// The entry is not a well-formed record (missing field, unknown category, bad type)
    #[error("malformed record: {0}")]
    Malformed(String),

    /// A timestamp does not fit in the supported range
    #[error("timestamp out of range for '{field}': {value}")]
    TimestampOutOfRange { field: &'static str, value: i64 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg)
                if code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Locked
            }
            _ => StoreError::OperationFailed {
                operation: "query",
                key: String::new(),
                message: err.to_string(),
            },
        }
    }
}
