//! Per-core critical sections
//!
//! A critical section masks interrupts on the current core and counts nesting
//! depth. Interrupts that the platform reports while a core is inside one are
//! latched into `delayed_cause` and dispatched when the outermost section is
//! left through the kernel's exit path.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::hal::Platform;

/// Critical-section bookkeeping of one core.
pub struct CoreCritical {
    level: AtomicUsize,
    was_enabled: AtomicBool,
    delayed_cause: AtomicU64,
}

impl CoreCritical {
    pub const fn new() -> Self {
        Self {
            level: AtomicUsize::new(0),
            was_enabled: AtomicBool::new(false),
            delayed_cause: AtomicU64::new(0),
        }
    }

    /// Current nesting depth. Zero outside any critical section.
    pub fn level(&self) -> usize {
        self.level.load(Ordering::Acquire)
    }

    /// Record interrupt causes to be handled once the core leaves its
    /// critical section.
    pub fn latch(&self, cause: u64) {
        self.delayed_cause.fetch_or(cause, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u64 {
        self.delayed_cause.load(Ordering::Acquire)
    }

    /// Take and clear the latched causes.
    pub fn take_delayed(&self) -> u64 {
        self.delayed_cause.swap(0, Ordering::AcqRel)
    }

    fn enter(&self, platform: &dyn Platform) {
        let was_enabled = platform.interrupts_disable();
        if self.level.fetch_add(1, Ordering::AcqRel) == 0 {
            self.was_enabled.store(was_enabled, Ordering::Release);
        }
    }

    fn exit(&self, platform: &dyn Platform) {
        let prev = self.level.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "critical section underflow");
        if prev == 1 {
            platform.interrupts_restore(self.was_enabled.load(Ordering::Acquire));
        }
    }
}

impl Default for CoreCritical {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII critical section (interrupts masked while alive).
pub struct CriticalSection<'a> {
    core: &'a CoreCritical,
    platform: &'a dyn Platform,
}

impl<'a> CriticalSection<'a> {
    pub fn enter(core: &'a CoreCritical, platform: &'a dyn Platform) -> Self {
        core.enter(platform);
        Self { core, platform }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.core.exit(self.platform);
    }
}
