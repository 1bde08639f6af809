//! Size and free-space measurements for the source and destination.

use crate::fs::walker;
use crate::utils::errors::{BackupError, Result};
use std::path::Path;

/// Measures trees and volumes. Implementations are stateless: nothing is
/// cached between calls, since files can change between ticks.
pub trait SizeProbe: Send + Sync {
    /// Bytes of every regular file reachable under `path`, links not followed.
    fn tree_size(&self, path: &Path) -> Result<u64>;

    /// Free bytes on the filesystem that holds `path`.
    fn free_space(&self, path: &Path) -> Result<u64>;
}

/// Probe backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl SizeProbe for FsProbe {
    fn tree_size(&self, path: &Path) -> Result<u64> {
        walker::calculate_total_size(path)
    }

    // Cast needed for cross-platform: field widths differ between Linux and macOS
    #[allow(clippy::unnecessary_cast)]
    fn free_space(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| BackupError::VolumeUnavailable {
            path: path.to_path_buf(),
            source: std::io::Error::from(errno),
        })?;

        Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A volume of fixed capacity whose free space shrinks with the bytes
    //! stored under the destination, so eviction effects are deterministic.

    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct VirtualVolume {
        pub destination: PathBuf,
        pub capacity: u64,
        /// Top-level names that do not consume capacity (the state record).
        pub ignored: Vec<String>,
        pub unavailable: AtomicBool,
    }

    impl VirtualVolume {
        pub(crate) fn new(destination: &Path, capacity: u64) -> Self {
            Self {
                destination: destination.to_path_buf(),
                capacity,
                ignored: vec![crate::state::DEFAULT_STATE_FILE.to_string()],
                unavailable: AtomicBool::new(false),
            }
        }

        pub(crate) fn used(&self) -> Result<u64> {
            let mut used = 0;
            for entry in std::fs::read_dir(&self.destination)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.ignored.contains(&name) {
                    continue;
                }
                used += walker::calculate_total_size(&entry.path())?;
            }
            Ok(used)
        }
    }

    impl SizeProbe for VirtualVolume {
        fn tree_size(&self, path: &Path) -> Result<u64> {
            FsProbe.tree_size(path)
        }

        fn free_space(&self, path: &Path) -> Result<u64> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(BackupError::VolumeUnavailable {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotConnected),
                });
            }
            Ok(self.capacity.saturating_sub(self.used()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fs_probe_tree_size() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.bin"), vec![0u8; 2048])?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/b.bin"), vec![0u8; 1024])?;

        assert_eq!(FsProbe.tree_size(temp_dir.path())?, 3072);
        Ok(())
    }

    #[test]
    fn test_fs_probe_free_space() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        // Any mounted test filesystem reports some free space.
        assert!(FsProbe.free_space(temp_dir.path())? > 0);
        Ok(())
    }

    #[test]
    fn test_fs_probe_missing_volume() {
        let err = FsProbe
            .free_space(Path::new("/definitely/not/mounted/here"))
            .unwrap_err();
        assert!(matches!(err, BackupError::VolumeUnavailable { .. }));
    }

    #[test]
    fn test_virtual_volume_tracks_destination() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let volume = testing::VirtualVolume::new(temp_dir.path(), 1000);
        assert_eq!(volume.free_space(temp_dir.path())?, 1000);

        fs::write(temp_dir.path().join("entry"), vec![0u8; 400])?;
        fs::write(temp_dir.path().join(crate::state::DEFAULT_STATE_FILE), b"{}")?;
        assert_eq!(volume.free_space(temp_dir.path())?, 600);
        Ok(())
    }
}
