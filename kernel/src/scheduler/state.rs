//! State - activation scheduling state machine
//!
//! An activation is `Runnable`, `Running`, `Blocked` on a set of events, or
//! `Terminated`. Which events a blocked activation waits for is a separate
//! bit set, so "waiting for a message or a timeout" is one state.

use core::fmt;

use bitflags::bitflags;

/// Priority levels of a scheduling pool, lowest first.
///
/// `Io` is never a base priority: it is the boosted level an activation sits
/// at after an interrupt is delivered to it, until it is next picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Mid = 2,
    High = 3,
    Io = 4,
}

impl Priority {
    pub const LEVELS: usize = 5;

    /// Default priority of newly created activations.
    pub const DEFAULT: Priority = Priority::Mid;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Low),
            2 => Some(Self::Mid),
            3 => Some(Self::High),
            4 => Some(Self::Io),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this priority may be assigned as an activation's base level.
    pub fn is_base(self) -> bool {
        self != Self::Io
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Low => write!(f, "low"),
            Self::Mid => write!(f, "mid"),
            Self::High => write!(f, "high"),
            Self::Io => write!(f, "io"),
        }
    }
}

bitflags! {
    /// Events a blocked activation can be woken by.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Events: u8 {
        /// A message arrived in the activation's queue.
        const MESSAGE     = 1 << 0;
        /// The callee of a synchronous call replied.
        const SYNC_RETURN = 1 << 1;
        /// A timed wait elapsed.
        const TIMEOUT     = 1 << 2;
        /// Explicit user notification.
        const NOTIFY      = 1 << 3;
        /// Memory commit notification.
        const COMMIT      = 1 << 4;
        /// A semaphore the activation queued on was signalled.
        const SEMAPHORE   = 1 << 5;
    }
}

impl Events {
    /// Events that are remembered when they arrive before the wait.
    pub const LATCHED: Events = Events::NOTIFY.union(Events::COMMIT);
}

/// Scheduling status of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedStatus {
    Runnable,
    Running,
    Blocked(Events),
    Terminated,
}

impl SchedStatus {
    /// Runnable or running: the activation occupies a run queue slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Runnable | Self::Running)
    }

    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    /// Events the activation is waiting for, empty unless blocked.
    pub fn waiting_for(self) -> Events {
        match self {
            Self::Blocked(events) => events,
            _ => Events::empty(),
        }
    }
}

impl fmt::Display for SchedStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Runnable => write!(f, "runnable"),
            Self::Running => write!(f, "running"),
            Self::Blocked(events) => {
                write!(f, "blocked(")?;
                let mut first = true;
                for (name, _) in events.iter_names() {
                    if !first {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", name)?;
                    first = false;
                }
                write!(f, ")")
            }
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Blocked-state names used by diagnostics and the user-facing status call,
/// each with the event it waits for. A blocked activation reports the first
/// entry whose event it waits for.
pub const BLOCKED_STATES: [(&str, Events); 6] = [
    ("sync_block", Events::SYNC_RETURN),
    ("sem_blocked", Events::SEMAPHORE),
    ("wait_commit", Events::COMMIT),
    ("wait_notify", Events::NOTIFY),
    ("waiting", Events::MESSAGE),
    ("wait_timeout", Events::TIMEOUT),
];

impl SchedStatus {
    /// Single-word name of this status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Blocked(events) => BLOCKED_STATES
                .iter()
                .find(|(_, ev)| events.contains(*ev))
                .map_or("blocked", |(name, _)| name),
        }
    }

    /// Inverse of [`SchedStatus::name`] for single-event states.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "runnable" => Some(Self::Runnable),
            "running" => Some(Self::Running),
            "terminated" => Some(Self::Terminated),
            _ => BLOCKED_STATES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, ev)| Self::Blocked(*ev)),
        }
    }
}

/// Validate status transition
pub fn validate_transition(from: SchedStatus, to: SchedStatus) -> bool {
    use SchedStatus::*;

    match (from, to) {
        (Runnable, Running) | (Running, Runnable) => true,
        (Runnable, Blocked(ev)) | (Running, Blocked(ev)) => !ev.is_empty(),
        (Blocked(_), Runnable) => true,
        // Re-stamping the wait set of an already blocked activation.
        (Blocked(_), Blocked(ev)) => !ev.is_empty(),
        (Terminated, _) => false,
        (_, Terminated) => true,
        _ => false,
    }
}
