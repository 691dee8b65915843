//! Scheduler subsystem
//!
//! One pool per core, each with a run queue per priority level, picking in
//! strict priority order with periodic decay so lower levels are not
//! starved. Operations live on [`crate::kernel::Kernel`].

pub mod core;
pub mod pool;
pub mod run_queue;
pub mod state;
pub mod stats;

// Re-exports
pub use self::core::{SchedulerError, SchedulerResult};
pub use pool::SchedPool;
pub use run_queue::{QueueBook, RunQueue};
pub use state::{Events, Priority, SchedStatus, BLOCKED_STATES};
pub use stats::PoolStatsSnapshot;
