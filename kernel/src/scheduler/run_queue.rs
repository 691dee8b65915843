//! Run queues
//!
//! One [`RunQueue`] per priority level of a pool. Slots are atomics so other
//! cores can search them without the pool lock; every write happens with the
//! pool's queue lock held, which callers prove by passing the locked
//! [`QueueBook`].
//!
//! Removal swaps the last entry into the hole, so slot indices are only hints
//! for anyone not holding the lock.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::act::activation::{ActId, QueueLink};
use crate::act::table::ActivationTable;
use crate::config::{DECAY_SHIFT, QUEUE_CAPACITY};
use crate::sched_assert;

/// Pool-wide bookkeeping guarded by the pool queue lock.
#[derive(Debug, Default)]
pub struct QueueBook {
    /// Activations across all levels. Always the sum of the levels' lengths.
    pub in_queues: usize,
}

pub struct RunQueue {
    slots: [AtomicU32; QUEUE_CAPACITY],
    end: AtomicUsize,
    current: AtomicUsize,
    decay: AtomicU32,
}

impl RunQueue {
    pub const fn new() -> Self {
        const EMPTY: AtomicU32 = AtomicU32::new(ActId::NONE_RAW);
        Self {
            slots: [EMPTY; QUEUE_CAPACITY],
            end: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            decay: AtomicU32::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.end.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot(&self, index: usize) -> Option<ActId> {
        ActId::from_raw(self.slots.get(index)?.load(Ordering::Acquire))
    }

    /// Round-robin cursor.
    pub fn cursor(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn contains(&self, act: ActId) -> bool {
        (0..self.len()).any(|i| self.slot(i) == Some(act))
    }

    /// Append `act` and record its slot in `link`.
    pub fn add(&self, book: &mut QueueBook, act: ActId, link: &QueueLink) {
        let end = self.end.load(Ordering::Acquire);
        sched_assert!(end < QUEUE_CAPACITY, "run queue overflow ({} slots)", QUEUE_CAPACITY);
        self.slots[end].store(act.raw(), Ordering::Release);
        link.set_slot(end);
        self.end.store(end + 1, Ordering::Release);
        book.in_queues += 1;
    }

    /// Locate `act` without the lock: the hint first, then the cursor, then a
    /// linear scan.
    pub fn find(&self, act: ActId, hint: usize) -> Option<usize> {
        if self.slot(hint) == Some(act) {
            return Some(hint);
        }
        let cur = self.cursor();
        if self.slot(cur) == Some(act) {
            return Some(cur);
        }
        (0..self.len()).find(|&i| self.slot(i) == Some(act))
    }

    /// Remove `act` from `index`, moving the last entry into its place.
    ///
    /// Returns `false`, touching nothing, if `act` is no longer at `index`;
    /// another core moved it between the lock-free search and the lock.
    pub fn remove_at(&self, book: &mut QueueBook, index: usize, act: ActId, acts: &ActivationTable) -> bool {
        let end = self.end.load(Ordering::Acquire);
        if index >= end || self.slot(index) != Some(act) {
            return false;
        }
        let last = end - 1;
        if index != last {
            let moved = self.slots[last].load(Ordering::Acquire);
            self.slots[index].store(moved, Ordering::Release);
            if let Some(moved) = ActId::from_raw(moved) {
                acts.get(moved).link.set_slot(index);
            }
        }
        self.slots[last].store(ActId::NONE_RAW, Ordering::Release);
        self.end.store(last, Ordering::Release);

        // Keep the cursor on the entry it pointed at, or just before the
        // hole so the entry swapped in is not skipped.
        let cur = self.current.load(Ordering::Acquire);
        let cur = if cur == last { index } else if cur == index { index.wrapping_sub(1) } else { cur };
        self.current.store(if last == 0 || cur >= last { last.saturating_sub(1) } else { cur }, Ordering::Release);

        sched_assert!(book.in_queues > 0, "run queue accounting underflow");
        book.in_queues -= 1;
        true
    }

    /// Advance the cursor and return the entry it lands on.
    pub fn advance(&self, _book: &QueueBook) -> Option<(usize, ActId)> {
        let end = self.len();
        if end == 0 {
            return None;
        }
        let next = self.cursor().wrapping_add(1) % end;
        self.current.store(next, Ordering::Release);
        self.slot(next).map(|act| (next, act))
    }

    /// Count a visit by the picker. Returns `true` when this visit is one
    /// where the level yields to lower levels.
    pub fn decay_tick(&self, _book: &QueueBook) -> bool {
        let visits = self.decay.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        visits & ((1 << DECAY_SHIFT) - 1) == 0
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
