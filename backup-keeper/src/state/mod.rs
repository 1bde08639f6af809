//! Durable retention state.
//!
//! The record lives next to the backup entries as a flat JSON object. The
//! month of the last committed backup is kept under `last_backup`; every other
//! field is carried through a rewrite untouched so newer writers can extend
//! the record.

use crate::utils::errors::{BackupError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default file name of the state record inside the destination.
pub const DEFAULT_STATE_FILE: &str = "backup_state.json";

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (year, month) = s
            .split_once('-')
            .ok_or_else(|| format!("month key {s:?} is not YYYY-MM"))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(format!("month key {s:?} is not YYYY-MM"));
        }
        let year: i32 = year
            .parse()
            .map_err(|_| format!("month key {s:?} has a non-numeric year"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("month key {s:?} has a non-numeric month"))?;
        MonthKey::new(year, month).ok_or_else(|| format!("month key {s:?} is out of range"))
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

/// Persisted scheduling state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionState {
    /// Month of the last fully created backup.
    #[serde(rename = "last_backup", default, skip_serializing_if = "Option::is_none")]
    pub last_backup_month: Option<MonthKey>,

    /// Fields this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RetentionState {
    /// A backup is due unless one was already committed for `month`.
    pub fn is_due(&self, month: MonthKey) -> bool {
        self.last_backup_month != Some(month)
    }

    /// Record a committed backup for `month`. Never moves the key backwards;
    /// returns whether the stored key changed.
    pub fn advance_to(&mut self, month: MonthKey) -> bool {
        match self.last_backup_month {
            Some(current) if current >= month => false,
            _ => {
                self.last_backup_month = Some(month);
                true
            }
        }
    }
}

/// File-backed store for [`RetentionState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `file_name` inside the destination directory.
    pub fn in_destination(destination: &Path, file_name: &str) -> Self {
        Self::new(destination.join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. A missing record is the zero state.
    pub fn load(&self) -> Result<RetentionState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RetentionState::default());
            }
            Err(e) => {
                return Err(BackupError::PathUnreadable {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&content).map_err(|e| BackupError::StateCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Persist the record: write a sibling temp file, fsync, rename over the
    /// old record, then fsync the directory.
    pub fn save(&self, state: &RetentionState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BackupError::Config(format!("invalid state path {}", self.path.display())))?;

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| BackupError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| BackupError::Io(e.error))?;

        fs::File::open(dir)?.sync_all()?;

        tracing::debug!(path = %self.path.display(), "State record saved");
        Ok(())
    }
}
