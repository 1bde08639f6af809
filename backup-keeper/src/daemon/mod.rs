//! Drivers for the tick engine: the interval loop and signal handling.

pub mod runner;
pub mod shutdown;
