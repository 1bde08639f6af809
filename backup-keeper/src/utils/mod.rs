//! Utility modules for the backup keeper.

pub mod errors;
pub mod logger;
pub mod units;

pub use errors::{BackupError, ErrorKind, Result};
