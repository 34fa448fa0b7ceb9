//! # Fidan Core Library
//!
//! Session lifecycle and local persistence for the Fidan focus timer. Screens,
//! gamification and the paired-device transport live in the host app and only
//! call into the interfaces exported here.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a tick-driven state machine for the single active focus
//!   session, including the background grace period
//! - **Session Controller**: owns the countdown and grace tasks on a tokio
//!   runtime and hands finished records to the repository
//! - **Records**: a crash-resilient record collection with backup, validation
//!   and recovery over a key-value store
//! - **Watch**: duplicate and plausibility filtering for completion notices
//!   from a paired watch
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: Core session state machine
//! - [`SessionController`]: Async timer driver and event source
//! - [`RecordRepository`]: Record persistence and recovery
//! - [`WatchDeduplicator`]: Watch event acceptance
//! - [`FidanConfig`]: Core configuration management

pub mod error;
pub mod events;
pub mod records;
pub mod storage;
pub mod timer;
pub mod watch;

pub use error::{ConfigError, CoreError, RecordDecodeError, SessionError, StoreError};
pub use events::Event;
pub use records::{
    LoadReport, LoadSource, Record, RecordKind, RecordRepository, RecordStats, RecoveryAction,
    RecoveryResult, TreeSpecies, ValidationResult,
};
pub use storage::{FidanConfig, KeyValueStore, MemoryStore, SqliteStore};
pub use timer::{SessionController, SessionSnapshot, SessionState, StopReason, TimerEngine};
pub use watch::{IngestOutcome, WatchDeduplicator, WatchEvent};
