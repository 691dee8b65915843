//! Activation table
//!
//! Fixed arena of control blocks indexed by [`ActId`]. Slots are claimed
//! with an atomic bump and never returned.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::activation::{ActId, Activation};
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};

pub struct ActivationTable {
    slots: Box<[Activation]>,
    next: AtomicUsize,
}

impl ActivationTable {
    pub fn new(capacity: usize) -> Self {
        let slots: Vec<Activation> = (0..capacity).map(|i| Activation::new(ActId(i as u32))).collect();
        Self { slots: slots.into_boxed_slice(), next: AtomicUsize::new(0) }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots handed out so far.
    pub fn len(&self) -> usize {
        self.next.load(Ordering::Acquire).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve the next free control block.
    pub(crate) fn claim(&self) -> SchedulerResult<&Activation> {
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        if index >= self.slots.len() {
            // Keep the counter from creeping towards overflow.
            self.next.store(self.slots.len(), Ordering::Release);
            return Err(SchedulerError::ActivationTableFull { capacity: self.slots.len() });
        }
        Ok(&self.slots[index])
    }

    pub fn try_get(&self, id: ActId) -> Option<&Activation> {
        self.slots.get(id.index()).filter(|act| act.is_registered())
    }

    pub fn lookup(&self, id: ActId) -> SchedulerResult<&Activation> {
        self.try_get(id).ok_or(SchedulerError::ActivationNotFound { id: id.raw() })
    }

    /// Control block of an id the kernel itself produced.
    pub(crate) fn get(&self, id: ActId) -> &Activation {
        let act = self.slots.get(id.index());
        crate::sched_assert!(
            act.map_or(false, Activation::is_registered),
            "activation {} is not registered",
            id
        );
        &self.slots[id.index()]
    }

    /// Registered activations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Activation> {
        self.slots[..self.len()].iter().filter(|act| act.is_registered())
    }
}
