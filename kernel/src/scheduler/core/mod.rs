//! Scheduler core module
//!
//! - `error`: typed errors and the invariant assertion macro
//! - `scheduler`: block, wake, priority and switch operations

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
