//! TOML-based core configuration.
//!
//! Stores tunables for:
//! - Session timers (tick interval, background grace period)
//! - Record repository backup cadence and capacity
//! - Watch event acceptance window and retention
//!
//! Configuration is stored at `~/.config/fidan/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Session timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

/// Record repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Write a backup every N adds.
    #[serde(default = "default_backup_every_adds")]
    pub backup_every_adds: u32,
    /// Write a backup when the last one is older than this.
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    /// Oldest records are pruned beyond this many.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

/// Watch event configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: i32,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: i32,
    /// Number of accepted events kept, newest first.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

/// Core configuration.
///
/// Serialized to/from TOML at `~/.config/fidan/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FidanConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_tick_interval_ms() -> u64 {
    1_000
}
fn default_grace_period_ms() -> u64 {
    30_000
}
fn default_backup_every_adds() -> u32 {
    5
}
fn default_backup_interval_secs() -> u64 {
    3_600
}
fn default_max_records() -> usize {
    10_000
}
fn default_min_duration_secs() -> i32 {
    1_200
}
fn default_max_duration_secs() -> i32 {
    1_800
}
fn default_max_events() -> usize {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backup_every_adds: default_backup_every_adds(),
            backup_interval_secs: default_backup_interval_secs(),
            max_records: default_max_records(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: default_min_duration_secs(),
            max_duration_secs: default_max_duration_secs(),
            max_events: default_max_events(),
        }
    }
}

impl FidanConfig {
    /// Default config file path.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default path, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// defaults cannot be written.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    /// Load and validate the config at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let cfg: FidanConfig = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reject values the timers and stores cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.tick_interval_ms == 0 {
            return Err(invalid("session.tick_interval_ms", "must be greater than zero"));
        }
        if self.session.grace_period_ms == 0 {
            return Err(invalid("session.grace_period_ms", "must be greater than zero"));
        }
        if self.repository.backup_every_adds == 0 {
            return Err(invalid("repository.backup_every_adds", "must be greater than zero"));
        }
        if self.repository.max_records == 0 {
            return Err(invalid("repository.max_records", "must be greater than zero"));
        }
        if self.watch.min_duration_secs > self.watch.max_duration_secs {
            return Err(invalid(
                "watch.min_duration_secs",
                "must not exceed watch.max_duration_secs",
            ));
        }
        if self.watch.max_events == 0 {
            return Err(invalid("watch.max_events", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("Falling back to default configuration: {e}");
                Self::default()
            }
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
