//! Activation control block
//!
//! Activations are the kernel's unit of execution. A control block is
//! allocated once from the activation table and never freed; termination only
//! changes its status.
//!
//! Field ownership:
//! - `sched` (the activation lock) guards [`SchedState`].
//! - `link` is written only under the owning pool's queue lock, but may be
//!   read without it as a hint.
//! - `sem_next` belongs to the wait list of the semaphore the activation is
//!   queued on, and is guarded by that semaphore's lock.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use spin::Once;

use crate::config::ACT_NAME_MAX_LEN;
use crate::hal::{Context, CoreId};
use crate::ipc::message::MessageQueue;
use crate::ipc::sync_call::SyncState;
use crate::scheduler::state::{Events, Priority, SchedStatus};
use crate::sync::spinlock::CriticalLock;

/// Index of an activation in the activation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActId(pub u32);

impl ActId {
    /// Raw value of "no activation" in atomic slots.
    pub const NONE_RAW: u32 = u32::MAX;

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != Self::NONE_RAW).then_some(ActId(raw))
    }
}

impl fmt::Display for ActId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle status, independent of scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActStatus {
    /// Schedulable and reachable through its references
    Alive = 0,
    /// References no longer honoured; still finishing its current work
    Revoked = 1,
    /// Never runs again
    Terminated = 2,
}

impl ActStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Alive),
            1 => Some(Self::Revoked),
            2 => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// Atomic activation status
pub struct AtomicActStatus {
    status: AtomicU8,
}

impl AtomicActStatus {
    pub const fn new(status: ActStatus) -> Self {
        Self { status: AtomicU8::new(status as u8) }
    }

    pub fn load(&self) -> ActStatus {
        ActStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(ActStatus::Terminated)
    }

    pub fn store(&self, status: ActStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Move Alive -> `to`. Fails with the current status otherwise.
    pub fn leave_alive(&self, to: ActStatus) -> Result<(), ActStatus> {
        self.status
            .compare_exchange(ActStatus::Alive as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|old| ActStatus::from_u8(old).unwrap_or(ActStatus::Terminated))
    }
}

/// Fixed-size activation name, truncated on a character boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ActName {
    bytes: [u8; ACT_NAME_MAX_LEN],
    len: u8,
}

impl ActName {
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(ACT_NAME_MAX_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; ACT_NAME_MAX_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { bytes, len: len as u8 }
    }

    pub fn as_str(&self) -> &str {
        // Built from a &str cut on a char boundary.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

impl fmt::Debug for ActName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// A pending timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeout {
    /// High-resolution time the wait started
    pub start: u64,
    /// Ticks to wait
    pub length: u64,
    /// Slot in the sleeper table while subscribed
    pub slot: Option<usize>,
}

/// Scheduling state, guarded by the activation lock.
#[derive(Debug, Clone, Copy)]
pub struct SchedState {
    pub status: SchedStatus,
    /// Core whose pool owns this activation
    pub pool: CoreId,
    pub is_idle: bool,
    /// Events that ended the last wait
    pub woke_from: Events,
    pub early_notify: bool,
    pub commit_early_notify: bool,
    pub timeout: Timeout,
}

impl SchedState {
    pub const fn new(pool: CoreId) -> Self {
        Self {
            status: SchedStatus::Terminated,
            pool,
            is_idle: false,
            woke_from: Events::empty(),
            early_notify: false,
            commit_early_notify: false,
            timeout: Timeout { start: 0, length: 0, slot: None },
        }
    }

    /// Whether the activation holds a slot in its pool's run queues.
    ///
    /// Every runnable or running activation does, except a pool's idle one.
    pub fn is_queued(&self) -> bool {
        !self.is_idle && self.status.is_active()
    }
}

/// Run-queue position of an activation.
///
/// `level` and `slot` belong to the pool: they are written under the pool
/// queue lock only, never under the activation lock (the picker de-boosts an
/// `Io` activation without taking its lock). Readers outside the queue lock
/// must re-check under it, as `SchedPool::dequeue` does.
pub struct QueueLink {
    level: AtomicU8,
    slot: AtomicU8,
    base: AtomicU8,
}

impl QueueLink {
    pub const fn new() -> Self {
        Self {
            level: AtomicU8::new(Priority::DEFAULT as u8),
            slot: AtomicU8::new(0),
            base: AtomicU8::new(Priority::DEFAULT as u8),
        }
    }

    /// Level the activation is queued at.
    pub fn level(&self) -> Priority {
        Priority::from_u8(self.level.load(Ordering::Acquire)).unwrap_or(Priority::DEFAULT)
    }

    pub fn set_level(&self, prio: Priority) {
        self.level.store(prio as u8, Ordering::Release);
    }

    /// Slot index hint inside its level.
    pub fn slot(&self) -> usize {
        self.slot.load(Ordering::Acquire) as usize
    }

    pub fn set_slot(&self, slot: usize) {
        self.slot.store(slot as u8, Ordering::Release);
    }

    /// Priority the activation returns to once an I/O boost is consumed.
    pub fn base(&self) -> Priority {
        Priority::from_u8(self.base.load(Ordering::Acquire)).unwrap_or(Priority::DEFAULT)
    }

    pub fn set_base(&self, prio: Priority) {
        self.base.store(prio as u8, Ordering::Release);
    }
}

impl Default for QueueLink {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Activation {
    id: ActId,
    registered: AtomicBool,
    name: Once<ActName>,
    status: AtomicActStatus,
    context: AtomicU64,
    switches: AtomicU64,
    pub(crate) sched: CriticalLock<SchedState>,
    pub(crate) link: QueueLink,
    pub(crate) sync: SyncState,
    pub(crate) sem_next: AtomicU32,
    queue: Once<MessageQueue>,
}

impl Activation {
    pub(crate) fn new(id: ActId) -> Self {
        Self {
            id,
            registered: AtomicBool::new(false),
            name: Once::new(),
            status: AtomicActStatus::new(ActStatus::Terminated),
            context: AtomicU64::new(Context::BOOT.0),
            switches: AtomicU64::new(0),
            sched: CriticalLock::new(SchedState::new(0)),
            link: QueueLink::new(),
            sync: SyncState::new(),
            sem_next: AtomicU32::new(ActId::NONE_RAW),
            queue: Once::new(),
        }
    }

    /// Fill in a freshly claimed control block. Called once per slot.
    pub(crate) fn init(&self, name: &str, context: Context, status: ActStatus, queue: MessageQueue) {
        self.name.call_once(|| ActName::new(name));
        self.queue.call_once(|| queue);
        self.context.store(context.0, Ordering::Release);
        self.status.store(status);
        self.registered.store(true, Ordering::Release);
    }

    pub fn id(&self) -> ActId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        self.name.get().map(ActName::as_str).unwrap_or("")
    }

    pub fn status(&self) -> ActStatus {
        self.status.load()
    }

    pub(crate) fn status_cell(&self) -> &AtomicActStatus {
        &self.status
    }

    pub fn context(&self) -> Context {
        Context(self.context.load(Ordering::Acquire))
    }

    /// Times this activation was switched in.
    pub fn switches(&self) -> u64 {
        self.switches.load(Ordering::Relaxed)
    }

    /// Base priority.
    pub fn priority(&self) -> Priority {
        self.link.base()
    }

    /// Level it is queued at, `Io` while boosted.
    pub fn level(&self) -> Priority {
        self.link.level()
    }

    pub(crate) fn count_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    /// The activation's message queue. Present once registered.
    pub(crate) fn queue(&self) -> Option<&MessageQueue> {
        self.queue.get()
    }

    pub(crate) fn sem_next(&self) -> Option<ActId> {
        ActId::from_raw(self.sem_next.load(Ordering::Acquire))
    }

    pub(crate) fn set_sem_next(&self, next: Option<ActId>) {
        self.sem_next.store(next.map_or(ActId::NONE_RAW, ActId::raw), Ordering::Release);
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Activation")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("status", &self.status())
            .field("level", &self.link.level())
            .field("base", &self.link.base())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_act_id_none() {
        assert_eq!(ActId::from_raw(ActId::NONE_RAW), None);
        assert_eq!(ActId::from_raw(7), Some(ActId(7)));
    }

    #[test]
    fn test_name_truncated_on_char_boundary() {
        assert_eq!(ActName::new("idle").as_str(), "idle");
        assert_eq!(ActName::new("a-very-long-activation-name").as_str(), "a-very-long-acti");
        // 15 ASCII bytes followed by a two-byte character.
        let name = ActName::new("abcdefghijklmno\u{e9}");
        assert_eq!(name.as_str(), "abcdefghijklmno");
    }

    #[test]
    fn test_leave_alive_once() {
        let st = AtomicActStatus::new(ActStatus::Alive);
        assert_eq!(st.leave_alive(ActStatus::Revoked), Ok(()));
        assert_eq!(st.leave_alive(ActStatus::Terminated), Err(ActStatus::Revoked));
        assert_eq!(st.load(), ActStatus::Revoked);
    }

    #[test]
    fn test_queue_link_accessors() {
        let link = QueueLink::new();
        link.set_level(Priority::Io);
        link.set_slot(9);
        link.set_base(Priority::High);
        assert_eq!(link.level(), Priority::Io);
        assert_eq!(link.slot(), 9);
        assert_eq!(link.base(), Priority::High);
    }

    #[test]
    fn test_is_queued() {
        let mut st = SchedState::new(0);
        assert!(!st.is_queued());
        st.status = SchedStatus::Running;
        assert!(st.is_queued());
        st.is_idle = true;
        assert!(!st.is_queued());
    }
}
