//! Custom error types for the backup keeper.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path unreadable: {}: {source}", path.display())]
    PathUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Volume unavailable: {}: {source}", path.display())]
    VolumeUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State record corrupt: {}: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Insufficient space: {required} bytes required, {available} bytes available after evicting every entry")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Eviction of {entry} failed: {source}")]
    EvictionFailed {
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy failed at {}: {source}", path.display())]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fieldless discriminant of [`BackupError`], reported by failed ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    PathUnreadable,
    VolumeUnavailable,
    StateCorrupt,
    InsufficientSpace,
    EvictionFailed,
    CopyFailed,
    Cancelled,
    Io,
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Config(_) => ErrorKind::Config,
            BackupError::PathUnreadable { .. } => ErrorKind::PathUnreadable,
            BackupError::VolumeUnavailable { .. } => ErrorKind::VolumeUnavailable,
            BackupError::StateCorrupt { .. } => ErrorKind::StateCorrupt,
            BackupError::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            BackupError::EvictionFailed { .. } => ErrorKind::EvictionFailed,
            BackupError::CopyFailed { .. } => ErrorKind::CopyFailed,
            BackupError::Cancelled => ErrorKind::Cancelled,
            BackupError::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::PathUnreadable => "path_unreadable",
            ErrorKind::VolumeUnavailable => "volume_unavailable",
            ErrorKind::StateCorrupt => "state_corrupt",
            ErrorKind::InsufficientSpace => "insufficient_space",
            ErrorKind::EvictionFailed => "eviction_failed",
            ErrorKind::CopyFailed => "copy_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = BackupError::InsufficientSpace {
            required: 10,
            available: 4,
        };
        assert_eq!(err.kind(), ErrorKind::InsufficientSpace);
        assert_eq!(err.kind().to_string(), "insufficient_space");

        let err = BackupError::EvictionFailed {
            entry: "backup_2026-01-01".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.kind(), ErrorKind::EvictionFailed);
        assert!(err.to_string().contains("backup_2026-01-01"));
    }
}
