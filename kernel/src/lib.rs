// src/lib.rs
// Cœur d'ordonnancement d'un micro-noyau à capacités
//
// Activations, pools d'ordonnancement par cœur, files de messages, appels
// synchrones, temporisations et routage des interruptions. La machine est
// abstraite derrière `hal::Platform`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Modules du noyau
pub mod act;
pub mod cap;
pub mod config;
pub mod hal;
pub mod ipc;
pub mod irq;
pub mod kernel;
pub mod logger;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod time;

pub use act::{ActId, ActSpec, ActStatus};
pub use cap::{Capability, Perms};
pub use config::KernelConfig;
pub use hal::{Context, CoreId, Platform};
pub use ipc::{CallSelector, Message, ReturnSlot};
pub use kernel::Kernel;
pub use scheduler::{Events, Priority, SchedStatus, SchedulerError, SchedulerResult};
pub use sync::{KMutex, Semaphore};
