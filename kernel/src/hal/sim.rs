//! Simulated platform
//!
//! A single host thread plays every core: the "current" core is whatever was
//! last passed to [`SimPlatform::set_core`]. Context switches are recorded and
//! return immediately, so kernel code after a switch keeps running on the
//! host stack as if the outgoing activation had already been resumed.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use super::{Context, CoreId, Platform};
use crate::config::MAX_CORES;

/// Something the kernel asked the simulated machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Switch { core: CoreId, from: Context, to: Context },
    Destroy { core: CoreId, dying: Context, to: Context },
    Compare { core: CoreId, value: u32 },
}

pub struct SimPlatform {
    core: AtomicUsize,
    irq_enabled: [AtomicBool; MAX_CORES],
    counter: AtomicU32,
    yields: AtomicUsize,
    events: Mutex<Vec<SimEvent>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        const ENABLED: AtomicBool = AtomicBool::new(true);
        Self {
            core: AtomicUsize::new(0),
            irq_enabled: [ENABLED; MAX_CORES],
            counter: AtomicU32::new(0),
            yields: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Make `core` the core executing subsequent kernel calls.
    pub fn set_core(&self, core: CoreId) {
        assert!(core < MAX_CORES, "simulated core {} out of range", core);
        self.core.store(core, Ordering::SeqCst);
    }

    pub fn set_counter(&self, value: u32) {
        self.counter.store(value, Ordering::SeqCst);
    }

    /// Advance the cycle counter, wrapping at 32 bits like the hardware.
    pub fn advance(&self, cycles: u32) {
        self.counter.fetch_add(cycles, Ordering::SeqCst);
    }

    pub fn interrupts_enabled(&self, core: CoreId) -> bool {
        self.irq_enabled[core].load(Ordering::SeqCst)
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    /// Drain recorded events.
    pub fn take_events(&self) -> Vec<SimEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    /// `(from, to)` of every switch performed, destroys included.
    pub fn switches(&self) -> Vec<(Context, Context)> {
        self.events
            .lock()
            .iter()
            .filter_map(|ev| match *ev {
                SimEvent::Switch { from, to, .. } => Some((from, to)),
                SimEvent::Destroy { dying, to, .. } => Some((dying, to)),
                SimEvent::Compare { .. } => None,
            })
            .collect()
    }

    /// Last value written to the compare register of `core`.
    pub fn last_compare(&self, core: CoreId) -> Option<u32> {
        self.events.lock().iter().rev().find_map(|ev| match *ev {
            SimEvent::Compare { core: c, value } if c == core => Some(value),
            _ => None,
        })
    }

    fn record(&self, event: SimEvent) {
        self.events.lock().push(event);
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn core_id(&self) -> CoreId {
        self.core.load(Ordering::SeqCst)
    }

    fn interrupts_disable(&self) -> bool {
        self.irq_enabled[self.core_id()].swap(false, Ordering::SeqCst)
    }

    fn interrupts_restore(&self, was_enabled: bool) {
        self.irq_enabled[self.core_id()].store(was_enabled, Ordering::SeqCst);
    }

    fn hw_yield(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }

    fn counter(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    fn compare_set(&self, value: u32) {
        self.record(SimEvent::Compare { core: self.core_id(), value });
    }

    fn context_switch(&self, from: Context, to: Context) {
        self.record(SimEvent::Switch { core: self.core_id(), from, to });
    }

    fn destroy_context(&self, dying: Context, to: Context) {
        self.record(SimEvent::Destroy { core: self.core_id(), dying, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_mask_is_per_core() {
        let sim = SimPlatform::new();
        assert!(sim.interrupts_disable());
        assert!(!sim.interrupts_enabled(0));
        assert!(sim.interrupts_enabled(1));

        sim.set_core(1);
        assert!(sim.interrupts_disable());
        sim.interrupts_restore(true);
        assert!(sim.interrupts_enabled(1));

        sim.set_core(0);
        sim.interrupts_restore(true);
        assert!(sim.interrupts_enabled(0));
    }

    #[test]
    fn test_counter_wraps() {
        let sim = SimPlatform::new();
        sim.set_counter(u32::MAX - 1);
        sim.advance(3);
        assert_eq!(sim.counter(), 1);
    }

    #[test]
    fn test_events_recorded_in_order() {
        let sim = SimPlatform::new();
        sim.context_switch(Context(1), Context(2));
        sim.compare_set(500);
        sim.destroy_context(Context(2), Context(3));

        assert_eq!(sim.switches(), vec![(Context(1), Context(2)), (Context(2), Context(3))]);
        assert_eq!(sim.last_compare(0), Some(500));
        assert_eq!(sim.take_events().len(), 3);
        assert!(sim.events().is_empty());
    }
}
