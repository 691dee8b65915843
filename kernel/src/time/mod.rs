//! Time management subsystem
//!
//! Per-core high-resolution clocks, the timer interrupt and timed waits.

pub mod clock;
pub mod timer;

pub use clock::CoreClock;
pub use timer::{next_compare, SleeperTable};
