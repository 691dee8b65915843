//! Scheduler Error Handling
//!
//! Typed errors for every operation a caller can get wrong. Broken kernel
//! invariants are not errors: they go through `sched_assert!` and halt.

use core::fmt;

use crate::cap::CapError;

/// Scheduler error types with detailed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    // ═══════════════════════════════════════════════════════════════
    // Activation Table Errors
    // ═══════════════════════════════════════════════════════════════

    /// Every activation slot is in use
    ActivationTableFull { capacity: usize },

    /// No registered activation with this id
    ActivationNotFound { id: u32 },

    /// Activation is no longer alive (revoked or terminated)
    TargetNotAlive { id: u32 },

    // ═══════════════════════════════════════════════════════════════
    // Reference Errors
    // ═══════════════════════════════════════════════════════════════

    /// A sealed reference failed to unseal
    InvalidReference(CapError),

    // ═══════════════════════════════════════════════════════════════
    // Message Errors
    // ═══════════════════════════════════════════════════════════════

    /// Message queue of the target is full
    MessageQueueFull { id: u32, len: usize },

    /// Reply requested without a sync token
    MissingSyncToken,

    /// Sync token already consumed or superseded
    StaleSyncToken { id: u32, expected: u64, found: u64 },

    // ═══════════════════════════════════════════════════════════════
    // Priority Errors
    // ═══════════════════════════════════════════════════════════════

    /// Invalid priority value
    InvalidPriority { value: u8 },

    // ═══════════════════════════════════════════════════════════════
    // Locking Errors
    // ═══════════════════════════════════════════════════════════════

    /// Mutex released by an activation that does not hold it
    NotMutexOwner { id: u32 },

    // ═══════════════════════════════════════════════════════════════
    // Interrupt Errors
    // ═══════════════════════════════════════════════════════════════

    /// Interrupt line out of range for this core
    InvalidInterruptLine { line: usize },

    /// Interrupt line registered to another activation
    InterruptLineOwned { line: usize, owner: u32 },

    /// Interrupt line has no registered handler
    InterruptLineUnregistered { line: usize },

    /// Core index out of range
    CoreNotAvailable { core: usize },

    // ═══════════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════════

    /// Invalid boot configuration
    InvalidConfig { reason: &'static str },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActivationTableFull { capacity } => {
                write!(f, "Activation table full: {} slots", capacity)
            }
            Self::ActivationNotFound { id } => write!(f, "Activation {} not found", id),
            Self::TargetNotAlive { id } => write!(f, "Activation {} is not alive", id),
            Self::InvalidReference(err) => write!(f, "Invalid reference: {}", err),
            Self::MessageQueueFull { id, len } => {
                write!(f, "Message queue of activation {} full ({} slots)", id, len)
            }
            Self::StaleSyncToken { id, expected, found } => write!(
                f,
                "Stale sync token for activation {}: expected {}, found {}",
                id, expected, found
            ),
            Self::InvalidConfig { reason } => write!(f, "Invalid configuration: {}", reason),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<CapError> for SchedulerError {
    fn from(err: CapError) -> Self {
        Self::InvalidReference(err)
    }
}

impl SchedulerError {
    /// Get recovery hint for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::ActivationTableFull { .. } => "Increase max_activations",
            Self::TargetNotAlive { .. } => "Target was revoked or terminated, drop the reference",
            Self::MessageQueueFull { .. } => "Let the receiver drain its queue and retry",
            Self::StaleSyncToken { .. } => "Caller was already answered or issued a newer call",
            Self::InterruptLineOwned { .. } => "Line belongs to another driver",
            Self::InvalidReference(_) => "Reference was forged or sealed with another type",
            _ => "Check kernel configuration",
        }
    }

    /// Is this a recoverable error?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidConfig { .. })
    }

    /// Should this error be logged?
    pub fn should_log(&self) -> bool {
        match self {
            Self::MessageQueueFull { .. } => false, // Sender retries
            Self::ActivationNotFound { .. } => false,
            _ => true,
        }
    }

    /// Get error severity (0-3)
    pub fn severity(&self) -> u8 {
        match self {
            Self::InvalidConfig { .. } => 3,
            Self::ActivationTableFull { .. } => 2,
            Self::StaleSyncToken { .. } => 2,
            Self::InvalidReference(_) => 2,
            Self::TargetNotAlive { .. } => 1,
            Self::InterruptLineOwned { .. } => 1,
            _ => 0,
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Log a scheduler error with its recovery hint and hand it back.
#[macro_export]
macro_rules! sched_error {
    ($err:expr) => {{
        let err = $err;
        if err.should_log() {
            log::error!("[SCHED] Error: {} (hint: {})", err, err.recovery_hint());
        }
        err
    }};
}

/// Macro for critical scheduler assertions
#[macro_export]
macro_rules! sched_assert {
    ($cond:expr, $reason:expr) => {
        if !$cond {
            panic!("[SCHED CRITICAL] Invariant violated: {}", $reason);
        }
    };
    ($cond:expr, $fmt:literal, $($arg:tt)+) => {
        if !$cond {
            panic!("[SCHED CRITICAL] Invariant violated: {}", format_args!($fmt, $($arg)+));
        }
    };
}
