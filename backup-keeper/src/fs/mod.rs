//! File system helpers: tree walking and space probing.

pub mod probe;
pub mod walker;

pub use probe::{FsProbe, SizeProbe};
