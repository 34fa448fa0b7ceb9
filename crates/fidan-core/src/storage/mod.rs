//! Key-value storage and configuration.
//!
//! The record repository and the watch deduplicator only depend on the
//! [`KeyValueStore`] trait; hosts inject a concrete backend at startup.

mod config;
mod memory;
mod sqlite;

pub use config::{FidanConfig, RepositoryConfig, SessionConfig, WatchConfig};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use crate::error::StoreError;

/// Durable string-keyed storage.
///
/// Writes are atomic per key; there are no transactions across keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every key in the store, including keys owned by other components.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Returns `~/.config/fidan[-dev]/` based on FIDAN_ENV.
///
/// Set FIDAN_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FIDAN_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("fidan-dev")
    } else {
        base_dir.join("fidan")
    };

    std::fs::create_dir_all(&dir).map_err(|e| StoreError::DataDir(e.to_string()))?;
    Ok(dir)
}
