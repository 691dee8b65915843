//! Per-activation message queue
//!
//! Bounded ring of [`Message`]s, power-of-two sized. Producers are any core
//! (and interrupt delivery); the consumer is the owning activation. All ring
//! mutation happens under the queue lock; `fill` mirrors the occupancy so a
//! waiter can test for pending messages without taking it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::cap::Capability;
use crate::sync::spinlock::CriticalLock;

/// A message as it sits in a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    /// Capability argument
    pub cap: Option<Capability>,
    /// Integer arguments
    pub args: [u64; 4],
    /// Selector the receiver dispatches on
    pub v0: u64,
    /// Present on synchronous calls; the receiver replies with it
    pub sync_token: Option<Capability>,
}

impl Message {
    pub const fn new(v0: u64) -> Self {
        Self { cap: None, args: [0; 4], v0, sync_token: None }
    }

    pub const fn with_args(self, args: [u64; 4]) -> Self {
        Self { args, ..self }
    }

    pub const fn with_cap(self, cap: Capability) -> Self {
        Self { cap: Some(cap), ..self }
    }
}

/// Ring storage; only reachable through the queue lock.
pub struct Ring {
    slots: Box<[Message]>,
    start: u64,
    end: u64,
}

impl Ring {
    fn new(len: usize) -> Self {
        let slots: Vec<Message> = (0..len).map(|_| Message::default()).collect();
        Self { slots: slots.into_boxed_slice(), start: 0, end: 0 }
    }

    fn mask(&self) -> u64 {
        self.slots.len() as u64 - 1
    }

    pub fn len(&self) -> usize {
        self.end.wrapping_sub(self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    /// Append. Hands the message back when full.
    pub fn push(&mut self, msg: Message) -> Result<(), Message> {
        if self.is_full() {
            return Err(msg);
        }
        let index = (self.end & self.mask()) as usize;
        self.slots[index] = msg;
        self.end = self.end.wrapping_add(1);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Message> {
        if self.is_empty() {
            return None;
        }
        let index = (self.start & self.mask()) as usize;
        let msg = core::mem::take(&mut self.slots[index]);
        self.start = self.start.wrapping_add(1);
        Some(msg)
    }
}

pub struct MessageQueue {
    ring: CriticalLock<Ring>,
    fill: AtomicUsize,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two(), "message queue length must be a power of two");
        Self { ring: CriticalLock::new(Ring::new(len)), fill: AtomicUsize::new(0), capacity: len }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pending messages, read without the lock.
    pub fn fill(&self) -> usize {
        self.fill.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.fill() == 0
    }

    pub(crate) fn ring(&self) -> &CriticalLock<Ring> {
        &self.ring
    }

    /// Republish the occupancy after mutating the ring under its lock.
    pub(crate) fn publish(&self, ring: &Ring) {
        self.fill.store(ring.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ring = Ring::new(4);
        for v0 in 0..4 {
            ring.push(Message::new(v0)).unwrap();
        }
        assert!(ring.is_full());
        assert_eq!(ring.push(Message::new(9)), Err(Message::new(9)));
        for v0 in 0..4 {
            assert_eq!(ring.pop().map(|m| m.v0), Some(v0));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_indices_wrap() {
        let mut ring = Ring::new(2);
        for v0 in 0..10 {
            ring.push(Message::new(v0).with_args([v0, 0, 0, 0])).unwrap();
            let msg = ring.pop().unwrap();
            assert_eq!(msg.args[0], v0);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_publish_mirrors_fill() {
        let queue = MessageQueue::new(8);
        let sim = crate::hal::sim::SimPlatform::new();
        let core = crate::sync::critical::CoreCritical::new();
        {
            let mut ring = queue.ring().lock(&core, &sim);
            ring.push(Message::new(1)).unwrap();
            ring.push(Message::new(2)).unwrap();
            queue.publish(&ring);
        }
        assert_eq!(queue.fill(), 2);
        assert_eq!(queue.capacity(), 8);
        assert!(!queue.is_empty());
    }
}
