//! Synchronous calls
//!
//! A caller mints a token: a capability sealed with the sync-token type
//! whose base names the caller and whose offset is the caller's current call
//! sequence number. Redeeming it advances the sequence with a
//! compare-and-swap, so each token answers at most one call and a newer call
//! invalidates older tokens.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::warn;

use super::message::Message;
use crate::act::activation::{ActId, ActStatus, Activation};
use crate::cap::{Capability, Perms};
use crate::hal::Platform;
use crate::kernel::Kernel;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::state::Events;
use crate::sched_error;
use crate::sync::spinlock::CriticalLock;

/// How a message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSelector {
    /// Queue and carry on
    Send,
    /// Queue and hand the core to the receiver if it shares it
    SendSwitch,
    /// Queue with a sync token and block until the reply
    SyncCall,
}

/// Values handed back to a synchronous caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReturnSlot {
    pub cap: Option<Capability>,
    pub v0: u64,
    pub v1: u64,
}

impl ReturnSlot {
    /// What a caller sees when its target could not be reached.
    pub const FAILED: ReturnSlot = ReturnSlot { cap: None, v0: u64::MAX, v1: u64::MAX };
}

/// Per-activation synchronous call state.
pub struct SyncState {
    sequence: AtomicU64,
    condition: AtomicBool,
    ret: CriticalLock<ReturnSlot>,
}

impl SyncState {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            condition: AtomicBool::new(false),
            ret: CriticalLock::new(ReturnSlot { cap: None, v0: 0, v1: 0 }),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Whether a call is outstanding.
    pub fn condition(&self) -> bool {
        self.condition.load(Ordering::Acquire)
    }

    pub(crate) fn clear_condition(&self) {
        self.condition.store(false, Ordering::Release);
    }

    /// Drop the outstanding call: clear the condition and burn its token.
    pub(crate) fn abandon(&self) {
        self.sequence.fetch_add(1, Ordering::AcqRel);
        self.clear_condition();
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Kernel<P> {
    /// Start a synchronous call for `caller` and return its token.
    ///
    /// Minting while a call is still outstanding invalidates the old token.
    pub fn sync_token_mint(&self, caller: ActId) -> SchedulerResult<Capability> {
        let act = self.acts.lookup(caller)?;
        if act.sync.condition.swap(true, Ordering::AcqRel) {
            warn!("[IPC] {} issued a sync call with one outstanding, revoking the old token", caller);
            act.sync.sequence.fetch_add(1, Ordering::AcqRel);
        }
        let token = Capability::new(caller.raw() as u64, 1, Perms::GLOBAL)
            .set_offset(act.sync.sequence())?
            .seal(&self.sealers.sync_token)?;
        Ok(token)
    }

    /// Consume `token`, returning the caller it answers.
    pub(crate) fn sync_token_redeem(&self, token: &Capability) -> SchedulerResult<&Activation> {
        let cap = token.unseal(&self.sealers.sync_token)?;
        let raw = u32::try_from(cap.base())
            .map_err(|_| SchedulerError::ActivationNotFound { id: ActId::NONE_RAW })?;
        let act = self.acts.lookup(ActId(raw))?;
        let found = cap.offset();
        act.sync
            .sequence
            .compare_exchange(found, found.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .map_err(|expected| SchedulerError::StaleSyncToken { id: raw, expected, found })?;
        Ok(act)
    }

    /// Return slot of `id`'s last synchronous call.
    pub fn sync_return(&self, id: ActId) -> SchedulerResult<ReturnSlot> {
        let act = self.acts.lookup(id)?;
        Ok(*self.lock(&act.sync.ret))
    }

    fn set_return(&self, act: &Activation, ret: ReturnSlot) {
        *self.lock(&act.sync.ret) = ret;
    }

    /// Queue `msg`; when full, give the receiver one chance to drain it.
    fn push_or_yield(&self, target: &Activation, msg: Message) -> SchedulerResult<()> {
        match self.msg_enqueue(target, msg) {
            Err(SchedulerError::MessageQueueFull { .. }) => {
                self.sched_reschedule(Some(target.id()), false);
                self.msg_enqueue(target, msg)
            }
            other => other,
        }
    }

    /// Send `msg` from `caller` to the activation behind `target`.
    ///
    /// A target that is not alive fails the send and leaves
    /// [`ReturnSlot::FAILED`] in the caller's return slot. For
    /// [`CallSelector::SyncCall`] the returned slot holds the reply.
    pub fn message_send(
        &self,
        caller: ActId,
        target: &Capability,
        selector: CallSelector,
        msg: Message,
    ) -> SchedulerResult<ReturnSlot> {
        let caller_act = self.acts.lookup(caller)?;
        let target_act = self.resolve_ref(target)?;

        if target_act.status() != ActStatus::Alive {
            self.set_return(caller_act, ReturnSlot::FAILED);
            return Err(sched_error!(SchedulerError::TargetNotAlive { id: target_act.id().raw() }));
        }

        let mut msg = msg;
        if selector == CallSelector::SyncCall {
            msg.sync_token = Some(self.sync_token_mint(caller)?);
        }
        if let Err(err) = self.push_or_yield(target_act, msg) {
            if selector == CallSelector::SyncCall {
                caller_act.sync.abandon();
            }
            return Err(err);
        }
        self.sched_receive_event(target_act.id(), Events::MESSAGE);

        match selector {
            CallSelector::Send => Ok(ReturnSlot::default()),
            CallSelector::SendSwitch => {
                let same_core = self.lock(&target_act.sched).pool == self.core_id();
                if same_core {
                    self.sched_reschedule(Some(target_act.id()), false);
                }
                Ok(ReturnSlot::default())
            }
            CallSelector::SyncCall => {
                self.sched_block_until_event(caller, Some(target_act.id()), Events::SYNC_RETURN, 0, false);
                self.sync_return(caller)
            }
        }
    }

    /// Answer the synchronous call identified by `token`.
    ///
    /// The caller gets `ret` and is woken; with `switch` the replying core
    /// hands itself to the caller right away. A missing or already used
    /// token is refused and wakes nobody.
    pub fn message_reply(&self, token: Option<Capability>, ret: ReturnSlot, switch: bool) -> SchedulerResult<ActId> {
        let token = token.ok_or(SchedulerError::MissingSyncToken)?;
        let caller = self.sync_token_redeem(&token).map_err(|err| sched_error!(err))?;
        self.set_return(caller, ret);
        self.sched_receive_event(caller.id(), Events::SYNC_RETURN);
        if switch {
            self.sched_reschedule(Some(caller.id()), false);
        }
        Ok(caller.id())
    }
}
