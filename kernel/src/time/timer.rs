//! Kernel timer and timed waits
//!
//! Timed waits sit in a single machine-wide table of [`MAX_WAITERS`] slots,
//! claimed lock-free with compare-and-swap. Each timer interrupt publishes
//! the new time, wakes every waiter whose timeout has elapsed, lets the
//! scheduler preempt, and re-arms the compare register.

use core::sync::atomic::{AtomicU32, Ordering};

use log::{info, trace};

use crate::act::activation::{ActId, Activation, SchedState};
use crate::config::MAX_WAITERS;
use crate::hal::{CoreId, Platform};
use crate::kernel::Kernel;
use crate::sched_assert;
use crate::scheduler::state::Events;

/// Slots of activations in a timed wait.
pub struct SleeperTable {
    slots: [AtomicU32; MAX_WAITERS],
}

impl SleeperTable {
    pub const fn new() -> Self {
        const EMPTY: AtomicU32 = AtomicU32::new(ActId::NONE_RAW);
        Self { slots: [EMPTY; MAX_WAITERS] }
    }

    /// Claim a free slot for `act`.
    pub fn subscribe(&self, act: ActId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.compare_exchange(ActId::NONE_RAW, act.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Release `index`, which must hold `act`.
    pub fn unsubscribe(&self, index: usize, act: ActId) {
        let released = self.slots[index]
            .compare_exchange(act.raw(), ActId::NONE_RAW, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        sched_assert!(released, "sleeper slot {} does not hold {}", index, act);
    }

    pub fn occupant(&self, index: usize) -> Option<ActId> {
        ActId::from_raw(self.slots[index].load(Ordering::Acquire))
    }

    pub fn occupied(&self) -> usize {
        (0..MAX_WAITERS).filter(|&i| self.occupant(i).is_some()).count()
    }

    pub fn contains(&self, act: ActId) -> bool {
        (0..MAX_WAITERS).any(|i| self.occupant(i) == Some(act))
    }
}

impl Default for SleeperTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Next compare value: one interval after the last, pushed further out
/// until it is at least `min` cycles ahead of `now`.
pub fn next_compare(last: u32, now: u32, interval: u32, min: u32) -> u32 {
    let mut next = last.wrapping_add(interval);
    while (next.wrapping_sub(now) as i32) < min as i32 {
        next = next.wrapping_add(interval);
    }
    next
}

impl<P: Platform> Kernel<P> {
    /// Start the timer of the calling core. Once per core.
    pub fn timer_init(&self) {
        let core = self.core_id();
        let clock = &self.clocks[core];
        let now = self.platform().counter();
        sched_assert!(clock.start(now), "timer of core {} initialised twice", core);
        let first = now.wrapping_add(self.config().timer_interval);
        clock.set_last_compare(first);
        self.platform().compare_set(first);
        info!("[TIME] core {} timer armed at {:#x}", core, first);
    }

    /// Arm a timed wait for a locked activation.
    pub(crate) fn timer_subscribe(&self, act: &Activation, st: &mut SchedState, timeout: u64) {
        sched_assert!(st.timeout.slot.is_none(), "activation {} already in a timed wait", act.id());
        let Some(slot) = self.sleepers.subscribe(act.id()) else {
            self.fatal(format_args!("This queue is too small: {} timed waits", MAX_WAITERS))
        };
        st.timeout.start = self.high_res_time();
        st.timeout.length = timeout;
        st.timeout.slot = Some(slot);
        trace!("[TIME] {} sleeps {} in slot {}", act.id(), timeout, slot);
    }

    /// Cancel the timed wait of a locked activation, if any.
    pub(crate) fn timer_unsubscribe(&self, act: &Activation, st: &mut SchedState) {
        if let Some(slot) = st.timeout.slot.take() {
            self.sleepers.unsubscribe(slot, act.id());
        }
    }

    fn deliver_timeout(&self, id: ActId, slot: usize, now: u64) {
        let Some(act) = self.acts.try_get(id) else { return };
        let mut st = self.lock(&act.sched);
        if st.timeout.slot != Some(slot) {
            return;
        }
        if now.saturating_sub(st.timeout.start) >= st.timeout.length {
            self.wake_locked(act, &mut st, Events::TIMEOUT, None);
        }
    }

    /// Timed waits currently armed, machine-wide.
    pub fn timed_waiters(&self) -> usize {
        self.sleepers.occupied()
    }

    /// Wake every timed waiter whose wait has elapsed at `now`.
    pub fn check_sleepers(&self, now: u64) {
        for slot in 0..MAX_WAITERS {
            if let Some(id) = self.sleepers.occupant(slot) {
                self.deliver_timeout(id, slot, now);
            }
        }
    }

    fn timer_rearm(&self, core: CoreId) {
        let clock = &self.clocks[core];
        let next = next_compare(
            clock.last_compare(),
            self.platform().counter(),
            self.config().timer_interval,
            self.config().timer_interval_min,
        );
        clock.set_last_compare(next);
        self.platform().compare_set(next);
    }

    /// Timer interrupt of the calling core.
    pub fn kernel_timer(&self) {
        let core = self.core_id();
        let now = self.high_res_time();
        self.clocks[core].update(now);
        self.check_sleepers(now);
        self.sched_reschedule(None, true);
        self.timer_rearm(core);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_fills_then_refuses() {
        let table = SleeperTable::new();
        for i in 0..MAX_WAITERS {
            assert_eq!(table.subscribe(ActId(i as u32)), Some(i));
        }
        assert_eq!(table.subscribe(ActId(99)), None);
        assert_eq!(table.occupied(), MAX_WAITERS);
        table.unsubscribe(3, ActId(3));
        assert_eq!(table.subscribe(ActId(99)), Some(3));
        assert!(table.contains(ActId(99)));
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_unsubscribe_wrong_owner() {
        let table = SleeperTable::new();
        table.subscribe(ActId(1));
        table.unsubscribe(0, ActId(2));
    }

    #[test]
    fn test_next_compare_plain() {
        assert_eq!(next_compare(10_000, 10_500, 10_000, 1_000), 20_000);
    }

    #[test]
    fn test_next_compare_skips_missed_ticks() {
        // Handler ran late: the next interval is already (almost) past.
        assert_eq!(next_compare(10_000, 19_500, 10_000, 1_000), 30_000);
        assert_eq!(next_compare(10_000, 45_000, 10_000, 1_000), 50_000);
    }

    #[test]
    fn test_next_compare_across_wrap() {
        let last = u32::MAX - 100;
        let next = next_compare(last, u32::MAX - 50, 1_000, 100);
        assert_eq!(next, last.wrapping_add(1_000));
    }
}
