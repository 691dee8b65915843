//! # Module IPC
//!
//! Files de messages par activation et appels synchrones.
//!
//! A push wakes a receiver blocked on `MESSAGE`. Synchronous calls carry a
//! sealed, single-use token that the callee hands back with its reply.

pub mod message;
pub mod sync_call;

pub use message::{Message, MessageQueue};
pub use sync_call::{CallSelector, ReturnSlot};

use log::trace;

use crate::act::activation::{ActId, Activation};
use crate::hal::Platform;
use crate::kernel::Kernel;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::state::Events;

impl<P: Platform> Kernel<P> {
    /// Append to the queue of `dest` without delivering an event.
    pub(crate) fn msg_enqueue(&self, dest: &Activation, msg: Message) -> SchedulerResult<()> {
        let queue = dest
            .queue()
            .ok_or(SchedulerError::ActivationNotFound { id: dest.id().raw() })?;
        let mut ring = self.lock(queue.ring());
        ring.push(msg).map_err(|_| SchedulerError::MessageQueueFull {
            id: dest.id().raw(),
            len: queue.capacity(),
        })?;
        queue.publish(&ring);
        trace!("[IPC] {} <- v0 {:#x} ({} pending)", dest.id(), msg.v0, ring.len());
        Ok(())
    }

    /// Queue `msg` for `dest` and wake it if it waits for messages.
    pub fn msg_push(&self, dest: ActId, msg: Message) -> SchedulerResult<()> {
        let act = self.acts.lookup(dest)?;
        self.msg_enqueue(act, msg)?;
        self.sched_receive_event(dest, Events::MESSAGE);
        Ok(())
    }

    /// Take the oldest pending message of `id`.
    pub fn msg_pop(&self, id: ActId) -> SchedulerResult<Option<Message>> {
        let act = self.acts.lookup(id)?;
        let Some(queue) = act.queue() else { return Ok(None) };
        let mut ring = self.lock(queue.ring());
        let msg = ring.pop();
        queue.publish(&ring);
        Ok(msg)
    }

    /// Pending messages of `id`.
    pub fn msg_fill(&self, id: ActId) -> SchedulerResult<usize> {
        let act = self.acts.lookup(id)?;
        Ok(act.queue().map_or(0, MessageQueue::fill))
    }

    /// Block `id` until its queue is non-empty.
    pub fn msg_wait(&self, id: ActId) {
        self.sched_block_until_event(id, None, Events::MESSAGE, 0, false);
    }
}
