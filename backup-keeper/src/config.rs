//! Configuration management for the backup keeper.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides (a `.env` file is honoured by the binary).

use crate::state::DEFAULT_STATE_FILE;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory tree to back up
    pub source: PathBuf,

    /// Store holding backup entries and the state record
    pub destination: PathBuf,

    /// Headroom kept free on the destination on top of the backup itself
    pub min_free_reserve_bytes: u64,

    /// Seconds between scheduled ticks (daemon mode only)
    pub tick_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// File name of the state record inside the destination
    #[serde(default = "default_state_file")]
    pub file_name: String,

    /// What to do when the state record cannot be parsed
    #[serde(default)]
    pub on_corrupt: CorruptStatePolicy,
}

/// Handling of an unparseable state record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptStatePolicy {
    /// Fail the tick and leave everything untouched
    #[default]
    Fail,
    /// Treat the record as empty; the next due tick overwrites it
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_state_file() -> String {
    DEFAULT_STATE_FILE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            file_name: default_state_file(),
            on_corrupt: CorruptStatePolicy::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Build a configuration purely from `BACKUP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| BackupError::Config(format!("{key} is not set")))
        };

        let mut config = Config {
            backup: BackupConfig {
                source: PathBuf::from(required("BACKUP_SOURCE")?),
                destination: PathBuf::from(required("BACKUP_DESTINATION")?),
                min_free_reserve_bytes: parse_var("BACKUP_MIN_FREE_RESERVE_BYTES", &required("BACKUP_MIN_FREE_RESERVE_BYTES")?)?,
                tick_interval_secs: parse_var("BACKUP_TICK_INTERVAL_SECS", &required("BACKUP_TICK_INTERVAL_SECS")?)?,
            },
            state: StateConfig::default(),
            log: LogConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `BACKUP_*` and `LOG_LEVEL` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("BACKUP_SOURCE") {
            self.backup.source = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BACKUP_DESTINATION") {
            self.backup.destination = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BACKUP_MIN_FREE_RESERVE_BYTES") {
            self.backup.min_free_reserve_bytes = parse_var("BACKUP_MIN_FREE_RESERVE_BYTES", &v)?;
        }
        if let Ok(v) = std::env::var("BACKUP_TICK_INTERVAL_SECS") {
            self.backup.tick_interval_secs = parse_var("BACKUP_TICK_INTERVAL_SECS", &v)?;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log.level = v;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> Result<()> {
        let backup = &self.backup;
        if backup.source.as_os_str().is_empty() {
            return Err(BackupError::Config("backup.source is empty".into()));
        }
        if backup.destination.as_os_str().is_empty() {
            return Err(BackupError::Config("backup.destination is empty".into()));
        }
        if backup.tick_interval_secs == 0 {
            return Err(BackupError::Config("backup.tick_interval_secs must be positive".into()));
        }
        if self.state.file_name.is_empty()
            || self.state.file_name.starts_with('.')
            || self.state.file_name.contains(std::path::MAIN_SEPARATOR)
        {
            return Err(BackupError::Config(format!(
                "state.file_name {:?} must be a plain, non-hidden file name",
                self.state.file_name
            )));
        }

        let source = normalize(&backup.source);
        let destination = normalize(&backup.destination);
        if source == destination {
            return Err(BackupError::Config("source and destination are the same path".into()));
        }
        if destination.starts_with(&source) {
            return Err(BackupError::Config(format!(
                "destination {} lies inside source {}",
                destination.display(),
                source.display()
            )));
        }
        if source.starts_with(&destination) {
            return Err(BackupError::Config(format!(
                "source {} lies inside destination {}",
                source.display(),
                destination.display()
            )));
        }
        Ok(())
    }
}

fn parse_var(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| BackupError::Config(format!("{key}={value:?} is not a non-negative integer")))
}

/// Canonical form when the path exists, the path as written otherwise.
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
