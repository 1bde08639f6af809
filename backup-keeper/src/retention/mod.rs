//! Oldest-first space reclamation over the destination store.
//!
//! Every top-level name in the destination is a backup entry except the
//! state record and hidden names, which are reserved for in-flight artifacts
//! (staging directories, temp files of the state record, the tick lock).
//! Entry age comes from filesystem metadata; there is no manifest.

use crate::fs::probe::SizeProbe;
use crate::utils::errors::{BackupError, Result};
use crate::utils::units::format_bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One complete backup in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    /// Birth time where the filesystem reports it, otherwise mtime.
    pub created_at: DateTime<Utc>,
    pub is_dir: bool,
}

/// What an eviction pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Evicted entry names, in deletion order.
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
    pub free_after: u64,
}

/// Deletes one entry from the destination.
pub trait EntryRemover: Send + Sync {
    fn remove(&self, entry: &BackupEntry) -> std::io::Result<()>;
}

/// Removes entries from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl EntryRemover for FsRemover {
    fn remove(&self, entry: &BackupEntry) -> std::io::Result<()> {
        if entry.is_dir {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        }
    }
}

pub struct RetentionManager {
    destination: PathBuf,
    state_file_name: String,
    probe: Arc<dyn SizeProbe>,
    remover: Arc<dyn EntryRemover>,
}

impl RetentionManager {
    pub fn new(destination: impl Into<PathBuf>, state_file_name: impl Into<String>, probe: Arc<dyn SizeProbe>) -> Self {
        Self {
            destination: destination.into(),
            state_file_name: state_file_name.into(),
            probe,
            remover: Arc::new(FsRemover),
        }
    }

    pub fn with_remover(mut self, remover: Arc<dyn EntryRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn is_candidate(&self, name: &str) -> bool {
        !name.starts_with('.') && name != self.state_file_name
    }

    /// Entries sorted oldest first, ties broken by name.
    pub fn list_entries(&self) -> Result<Vec<BackupEntry>> {
        let unreadable = |source| BackupError::PathUnreadable {
            path: self.destination.clone(),
            source,
        };

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.destination).map_err(unreadable)? {
            let dir_entry = dir_entry.map_err(unreadable)?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if !self.is_candidate(&name) {
                continue;
            }

            let path = dir_entry.path();
            let metadata = fs::symlink_metadata(&path).map_err(|source| BackupError::PathUnreadable {
                path: path.clone(),
                source,
            })?;
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|source| BackupError::PathUnreadable {
                    path: path.clone(),
                    source,
                })?;

            entries.push(BackupEntry {
                name,
                path,
                created_at: created.into(),
                is_dir: metadata.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Delete the oldest entries until the destination has at least
    /// `required_free` bytes free, stopping as soon as it does.
    ///
    /// A failed deletion stops the pass with `EvictionFailed`; later entries
    /// are left untouched. Running out of entries while still short fails
    /// with `InsufficientSpace`.
    pub fn ensure_free_space(&self, required_free: u64, cancel: &CancellationToken) -> Result<EvictionReport> {
        let mut candidates: VecDeque<BackupEntry> = self.list_entries()?.into();
        let mut report = EvictionReport::default();

        loop {
            let free = self.probe.free_space(&self.destination)?;
            if free >= required_free {
                report.free_after = free;
                if !report.evicted.is_empty() {
                    info!(
                        evicted = report.evicted.len(),
                        freed = %format_bytes(report.freed_bytes),
                        free = %format_bytes(free),
                        "Reclaimed space from old backups"
                    );
                }
                return Ok(report);
            }

            let Some(entry) = candidates.pop_front() else {
                warn!(
                    required = %format_bytes(required_free),
                    free = %format_bytes(free),
                    "No backups left to evict"
                );
                return Err(BackupError::InsufficientSpace {
                    required: required_free,
                    available: free,
                });
            };

            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let size = match self.probe.tree_size(&entry.path) {
                Ok(size) => size,
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "Could not size entry before eviction");
                    0
                }
            };

            self.remover.remove(&entry).map_err(|source| BackupError::EvictionFailed {
                entry: entry.name.clone(),
                source,
            })?;

            info!(
                entry = %entry.name,
                size = %format_bytes(size),
                created_at = %entry.created_at.to_rfc3339(),
                "Evicted backup"
            );
            report.freed_bytes += size;
            report.evicted.push(entry.name);
        }
    }
}
