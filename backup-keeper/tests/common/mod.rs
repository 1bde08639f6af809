#![allow(dead_code)]

use backup_keeper::config::{BackupConfig, Config, LogConfig, StateConfig};
use backup_keeper::fs::{FsProbe, SizeProbe};
use backup_keeper::scheduler::Clock;
use backup_keeper::state::DEFAULT_STATE_FILE;
use backup_keeper::Result;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Volume of fixed capacity: free space is capacity minus the bytes stored
/// under the destination, not counting the state record.
pub struct FixedVolume {
    pub destination: PathBuf,
    pub capacity: u64,
}

impl SizeProbe for FixedVolume {
    fn tree_size(&self, path: &Path) -> Result<u64> {
        FsProbe.tree_size(path)
    }

    fn free_space(&self, _path: &Path) -> Result<u64> {
        let mut used = 0;
        for entry in fs::read_dir(&self.destination)? {
            let entry = entry?;
            if entry.file_name() == DEFAULT_STATE_FILE {
                continue;
            }
            used += FsProbe.tree_size(&entry.path())?;
        }
        Ok(self.capacity.saturating_sub(used))
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Workspace {
    pub tmp: TempDir,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        let destination = tmp.path().join("backups");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&destination).unwrap();
        Self {
            tmp,
            source,
            destination,
        }
    }

    pub fn config(&self, reserve: u64) -> Config {
        Config {
            backup: BackupConfig {
                source: self.source.clone(),
                destination: self.destination.clone(),
                min_free_reserve_bytes: reserve,
                tick_interval_secs: 3600,
            },
            state: StateConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn source_file(&self, rel: &str, bytes: usize) {
        let path = self.source.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![42u8; bytes]).unwrap();
    }

    /// An existing entry; entries created one after another get ascending ages.
    pub fn entry(&self, name: &str, bytes: usize) {
        let dir = self.destination.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("payload.bin"), vec![0u8; bytes]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    /// Visible names in the destination, sorted.
    pub fn listing(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.destination)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}
