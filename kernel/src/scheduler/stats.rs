//! Per-pool scheduling counters

use core::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without locking.
pub struct PoolStats {
    switches: AtomicU64,
    picks: AtomicU64,
    idle_picks: AtomicU64,
    hint_hits: AtomicU64,
    io_deboosts: AtomicU64,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Context switches performed
    pub switches: u64,
    /// Calls to the picker
    pub picks: u64,
    /// Picks that fell back to the idle activation
    pub idle_picks: u64,
    /// Reschedules that honoured the caller's hint
    pub hint_hits: u64,
    /// I/O boosts consumed by a pick
    pub io_deboosts: u64,
}

impl PoolStats {
    pub const fn new() -> Self {
        Self {
            switches: AtomicU64::new(0),
            picks: AtomicU64::new(0),
            idle_picks: AtomicU64::new(0),
            hint_hits: AtomicU64::new(0),
            io_deboosts: AtomicU64::new(0),
        }
    }

    pub fn count_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_pick(&self) {
        self.picks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_idle_pick(&self) {
        self.idle_picks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_hint_hit(&self) {
        self.hint_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_io_deboost(&self) {
        self.io_deboosts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            switches: self.switches.load(Ordering::Relaxed),
            picks: self.picks.load(Ordering::Relaxed),
            idle_picks: self.idle_picks.load(Ordering::Relaxed),
            hint_hits: self.hint_hits.load(Ordering::Relaxed),
            io_deboosts: self.io_deboosts.load(Ordering::Relaxed),
        }
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}
