//! Cross-process exclusion for ticks touching the same destination.

use crate::utils::errors::Result;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;

pub const LOCK_FILE: &str = ".backup-keeper.lock";

/// Exclusive advisory lock on `<destination>/.backup-keeper.lock`, held until
/// dropped. Blocks while another process holds it.
pub struct DestinationLock {
    _lock: Flock<File>,
}

impl DestinationLock {
    pub fn acquire(destination: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(destination.join(LOCK_FILE))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| std::io::Error::from(errno))?;

        Ok(Self { _lock: lock })
    }
}
