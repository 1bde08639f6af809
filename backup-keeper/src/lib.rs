//! Backup Keeper Library
//!
//! Takes one full copy of a source tree per calendar month and evicts the
//! oldest backups when the destination runs short of space.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod retention;
pub mod scheduler;
pub mod state;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use scheduler::{BackupScheduler, TickResult};
pub use utils::errors::{BackupError, ErrorKind};
pub type Result<T> = std::result::Result<T, BackupError>;
