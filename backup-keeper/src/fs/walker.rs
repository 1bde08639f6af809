//! Directory traversal for sizing and copying backup trees.
//!
//! Symbolic links are never followed: a link is reported as a link and
//! contributes zero bytes. Only regular files carry a size.

use crate::utils::errors::{BackupError, Result};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// What a walked path is, without following links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, FIFOs, device nodes.
    Other,
}

/// Information about a path discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size in bytes (zero for anything but regular files)
    pub size: u64,

    pub kind: EntryKind,

    /// Depth from root; the root itself is depth 0
    pub depth: usize,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        let size = match kind {
            EntryKind::File => entry.metadata()?.len(),
            _ => 0,
        };

        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            size,
            kind,
            depth: entry.depth(),
        })
    }
}

/// Walk `root` depth-first in file-name order, parents before children, and
/// call `visit` for every path including the root. The first traversal error
/// or visitor error aborts the walk.
pub fn walk_tree<F>(root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&FileInfo) -> Result<()>,
{
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| BackupError::PathUnreadable {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;

        let info = FileInfo::from_entry(&entry, root).map_err(|e| BackupError::PathUnreadable {
            path: entry.path().to_path_buf(),
            source: e,
        })?;

        visit(&info)?;
    }

    Ok(())
}

/// Total bytes of regular files under `root`.
pub fn calculate_total_size(root: &Path) -> Result<u64> {
    let mut total_size = 0u64;

    walk_tree(root, |file| {
        total_size += file.size;
        Ok(())
    })?;

    Ok(total_size)
}

/// Count regular files under `root`.
pub fn count_files(root: &Path) -> Result<usize> {
    let mut count = 0;

    walk_tree(root, |file| {
        if file.kind == EntryKind::File {
            count += 1;
        }
        Ok(())
    })?;

    Ok(count)
}
