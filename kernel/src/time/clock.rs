//! High-resolution clock
//!
//! Extends the 32-bit per-core cycle counter to 64 bits. A reading whose low
//! half is below the last one is a wrap when the drop is large, and a small
//! backwards jump (counter skew) otherwise; a backwards jump is refused and
//! the previous value kept.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use log::warn;

use crate::hal::Platform;
use crate::kernel::Kernel;

const LOW_MASK: u64 = 0xFFFF_FFFF;
const WRAP: u64 = 1 << 32;

/// Combine the last 64-bit reading with a fresh 32-bit counter value.
pub fn extend(last: u64, low: u32) -> u64 {
    let candidate = (last & !LOW_MASK) | low as u64;
    if candidate >= last {
        return candidate;
    }
    if last - candidate < WRAP / 2 {
        warn!("[TIME] counter went backwards by {} cycles, holding", last - candidate);
        last
    } else {
        candidate + WRAP
    }
}

/// Clock state of one core.
pub struct CoreClock {
    high_res: AtomicU64,
    last_compare: AtomicU32,
    started: AtomicBool,
}

impl CoreClock {
    pub const fn new() -> Self {
        Self { high_res: AtomicU64::new(0), last_compare: AtomicU32::new(0), started: AtomicBool::new(false) }
    }

    pub fn last(&self) -> u64 {
        self.high_res.load(Ordering::Acquire)
    }

    /// Read without publishing, retrying if the tick handler moved the base
    /// while the counter was being sampled.
    pub fn read(&self, counter: impl Fn() -> u32) -> u64 {
        loop {
            let last = self.last();
            let low = counter();
            if self.last() == last {
                return extend(last, low);
            }
        }
    }

    /// Publish a new reading. Never moves backwards.
    pub fn update(&self, now: u64) {
        self.high_res.fetch_max(now, Ordering::AcqRel);
    }

    pub fn last_compare(&self) -> u32 {
        self.last_compare.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_compare(&self, value: u32) {
        self.last_compare.store(value, Ordering::Release);
    }

    /// Mark the clock started. Returns `false` if it already was.
    pub(crate) fn start(&self, now: u32) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.high_res.store(now as u64, Ordering::Release);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Default for CoreClock {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Kernel<P> {
    /// 64-bit cycle time of the calling core.
    pub fn high_res_time(&self) -> u64 {
        self.clocks[self.core_id()].read(|| self.platform().counter())
    }
}
