//! Backup entry creation.
//!
//! A new entry is copied into a hidden staging directory next to its final
//! location and renamed into place only once every file has been copied, so
//! a crash mid-copy never leaves a half-written entry under a real name.

use crate::fs::walker::{walk_tree, EntryKind, FileInfo};
use crate::utils::errors::{BackupError, Result};
use crate::utils::units::{format_bytes, format_duration};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STAGING_PREFIX: &str = ".staging-";

/// Entry name for a backup taken on `date`: `backup_YYYY-MM-DD`.
pub fn entry_name(date: NaiveDate) -> String {
    format!("backup_{}", date.format("%Y-%m-%d"))
}

/// Remove every staging directory left in `destination` by interrupted
/// runs and return their names. Callers must hold the destination lock.
pub fn remove_stale_staging(destination: &Path) -> Result<Vec<String>> {
    let unreadable = |source| BackupError::PathUnreadable {
        path: destination.to_path_buf(),
        source,
    };

    let mut removed = Vec::new();
    for dir_entry in fs::read_dir(destination).map_err(unreadable)? {
        let dir_entry = dir_entry.map_err(unreadable)?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(STAGING_PREFIX) {
            continue;
        }

        let path = dir_entry.path();
        let outcome = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match outcome {
            Ok(()) => {
                warn!(path = %path.display(), "Removed stale staging directory");
                removed.push(name);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale staging directory"),
        }
    }
    Ok(removed)
}

/// Creates backup entries in the destination store.
pub trait BackupExecutor: Send + Sync {
    /// Copy `source` into a new entry for `date` under `destination` and
    /// return the entry name. Any I/O error fails the whole entry.
    fn create_entry(
        &self,
        source: &Path,
        destination: &Path,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Copy statistics for one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
    pub links: usize,
    pub skipped_special: usize,
}

/// Recursive copy on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyExecutor;

impl BackupExecutor for CopyExecutor {
    fn create_entry(
        &self,
        source: &Path,
        destination: &Path,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let start_time = Instant::now();
        let name = entry_name(date);
        let final_path = destination.join(&name);
        let staging = destination.join(format!("{STAGING_PREFIX}{name}"));

        if staging.exists() {
            warn!(path = %staging.display(), "Removing leftover staging directory");
            fs::remove_dir_all(&staging).map_err(|source| BackupError::CopyFailed {
                path: staging.clone(),
                source,
            })?;
        }

        info!(entry = %name, source = %source.display(), "Starting backup copy");

        let stats = match copy_tree(source, &staging, cancel) {
            Ok(stats) => stats,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                    }
                }
                return Err(e);
            }
        };

        fs::rename(&staging, &final_path).map_err(|source| BackupError::CopyFailed {
            path: final_path.clone(),
            source,
        })?;
        fs::File::open(destination)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| BackupError::CopyFailed {
                path: destination.to_path_buf(),
                source,
            })?;

        info!(
            entry = %name,
            files = stats.files,
            links = stats.links,
            skipped_special = stats.skipped_special,
            size = %format_bytes(stats.bytes),
            elapsed = %format_duration(start_time.elapsed().as_secs()),
            "Backup entry created"
        );

        Ok(name)
    }
}

/// Copy the tree at `source` to `target`, which must not exist yet.
///
/// Cancellation is honoured between files; a file that has started copying
/// is always finished.
pub fn copy_tree(source: &Path, target: &Path, cancel: &CancellationToken) -> Result<CopyStats> {
    let mut stats = CopyStats::default();

    let copy_failed = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BackupError::CopyFailed { path, source }
    };

    walk_tree(source, |info: &FileInfo| {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let dst = if info.depth == 0 {
            target.to_path_buf()
        } else {
            target.join(&info.relative_path)
        };

        match info.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&dst).map_err(copy_failed(&dst))?;
            }
            EntryKind::File => {
                if info.depth == 0 {
                    // A lone file as source still produces a directory entry.
                    fs::create_dir_all(target).map_err(copy_failed(target))?;
                    let file_name = info.path.file_name().map(PathBuf::from).unwrap_or_default();
                    copy_file(&info.path, &target.join(file_name))?;
                } else {
                    copy_file(&info.path, &dst)?;
                }
                stats.files += 1;
                stats.bytes += info.size;
                debug!(path = %info.relative_path.display(), size = info.size, "Copied file");
            }
            EntryKind::Symlink => {
                let link_target = fs::read_link(&info.path).map_err(copy_failed(&info.path))?;
                std::os::unix::fs::symlink(&link_target, &dst).map_err(copy_failed(&dst))?;
                stats.links += 1;
            }
            EntryKind::Other => {
                debug!(path = %info.path.display(), "Skipping special file");
                stats.skipped_special += 1;
            }
        }

        Ok(())
    })
    .map_err(|e| match e {
        BackupError::PathUnreadable { path, source } => BackupError::CopyFailed { path, source },
        other => other,
    })?;

    Ok(stats)
}

/// Copy one regular file, keeping its permissions and modification time.
fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let failed = |path: &Path, source| BackupError::CopyFailed {
        path: path.to_path_buf(),
        source,
    };

    fs::copy(src, dst).map_err(|e| failed(src, e))?;

    let modified = fs::metadata(src).and_then(|m| m.modified()).map_err(|e| failed(src, e))?;
    fs::File::open(dst)
        .and_then(|f| f.set_modified(modified))
        .map_err(|e| failed(dst, e))?;

    Ok(())
}
