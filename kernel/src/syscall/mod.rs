//! # Interface des Appels Système
//!
//! Entry points reached from the user trampoline. Calls that act on another
//! activation take its sealed control reference and unseal it first; every
//! call leaves through [`Kernel::exit_critical_path`] so interrupts latched
//! while it ran are dispatched before returning to user code.

use log::{debug, warn};

use crate::act::activation::{ActId, ActStatus};
use crate::cap::Capability;
use crate::hal::Platform;
use crate::ipc::message::Message;
use crate::ipc::sync_call::{CallSelector, ReturnSlot};
use crate::kernel::Kernel;
use crate::scheduler::core::error::SchedulerResult;
use crate::scheduler::state::{Events, SchedStatus};

impl<P: Platform> Kernel<P> {
    fn syscall_exit<T>(&self, ret: T) -> T {
        self.exit_critical_path();
        ret
    }

    /// Give up the core. `ticks == 0` only yields; otherwise the caller
    /// sleeps that long. Returns the ticks actually slept.
    pub fn sys_sleep(&self, caller: ActId, ticks: u64) -> u64 {
        let slept = if ticks == 0 {
            self.sched_reschedule(None, false);
            0
        } else {
            self.sched_block_until_event(caller, None, Events::empty(), ticks, false)
        };
        self.syscall_exit(slept)
    }

    /// Block until a message is queued for the caller.
    pub fn sys_wait(&self, caller: ActId) {
        self.msg_wait(caller);
        self.syscall_exit(())
    }

    /// Send `msg` to the activation behind `target`.
    pub fn sys_message_send(
        &self,
        caller: ActId,
        target: &Capability,
        selector: CallSelector,
        msg: Message,
    ) -> SchedulerResult<ReturnSlot> {
        let ret = self.message_send(caller, target, selector, msg);
        self.syscall_exit(ret)
    }

    /// Reply to a synchronous call.
    pub fn sys_message_reply(&self, token: Option<Capability>, ret: ReturnSlot, switch: bool) -> SchedulerResult<()> {
        let res = self.message_reply(token, ret, switch).map(|_| ());
        self.syscall_exit(res)
    }

    /// Post a user notification to the activation behind `target`.
    pub fn sys_notify(&self, target: &Capability) -> SchedulerResult<()> {
        let res = self.resolve_ref(target).map(|act| {
            self.sched_receive_event(act.id(), Events::NOTIFY);
        });
        self.syscall_exit(res)
    }

    // ═══════════════════════════════════════════════════════════════
    // Control reference calls
    // ═══════════════════════════════════════════════════════════════

    pub fn sys_act_ctrl_get_status(&self, ctrl: &Capability) -> SchedulerResult<ActStatus> {
        let res = self.resolve_ctrl(ctrl).map(|act| act.status());
        self.syscall_exit(res)
    }

    pub fn sys_act_ctrl_get_sched_status(&self, ctrl: &Capability) -> SchedulerResult<SchedStatus> {
        let res = self.resolve_ctrl(ctrl).and_then(|act| self.sched_status(act.id()));
        self.syscall_exit(res)
    }

    /// Plain reference of the activation a control reference names.
    pub fn sys_act_ctrl_get_ref(&self, ctrl: &Capability) -> SchedulerResult<Capability> {
        let res = self.resolve_ctrl(ctrl).and_then(|act| self.act_ref(act.id()));
        self.syscall_exit(res)
    }

    pub fn sys_act_revoke(&self, ctrl: &Capability) -> SchedulerResult<()> {
        let res = self.resolve_ctrl(ctrl).and_then(|act| self.act_revoke(act.id()));
        self.syscall_exit(res)
    }

    /// Terminate an activation. Does not return when it is the caller.
    pub fn sys_act_terminate(&self, ctrl: &Capability) -> SchedulerResult<()> {
        let res = self.resolve_ctrl(ctrl).and_then(|act| self.act_terminate(act.id()));
        self.syscall_exit(res)
    }

    /// Route `line` of the calling core to the activation behind `ctrl`.
    pub fn sys_interrupt_register(&self, ctrl: &Capability, line: usize, v0: u64, arg: u64) -> SchedulerResult<()> {
        let core = self.core_id();
        let res = self
            .resolve_ctrl(ctrl)
            .and_then(|act| self.irq_register(act.id(), core, line, v0, arg));
        self.syscall_exit(res)
    }

    pub fn sys_interrupt_enable(&self, ctrl: &Capability, line: usize) -> SchedulerResult<()> {
        let core = self.core_id();
        let res = self.resolve_ctrl(ctrl).and_then(|act| self.irq_enable(act.id(), core, line));
        self.syscall_exit(res)
    }

    // ═══════════════════════════════════════════════════════════════
    // Fast path
    // ═══════════════════════════════════════════════════════════════

    /// Slow half of the message fast path: optionally answer a synchronous
    /// call, then wait for the next message (or a notification when
    /// `notify_is_timeout`) for at most `timeout` ticks, handing the core to
    /// the activation just answered.
    ///
    /// Returns the ticks spent waiting, 0 when no timeout was armed or the
    /// wait ended at once.
    pub fn sys_fastpath_bailout(
        &self,
        caller: ActId,
        reply: Option<(Capability, ReturnSlot)>,
        timeout: u64,
        notify_is_timeout: bool,
    ) -> u64 {
        let hint = reply.and_then(|(token, ret)| match self.message_reply(Some(token), ret, false) {
            Ok(answered) => Some(answered),
            Err(err) => {
                warn!("[SYSCALL] {} bailout reply refused: {}", caller, err);
                None
            }
        });

        let mut events = Events::MESSAGE;
        if notify_is_timeout {
            events |= Events::NOTIFY;
        }
        debug!("[SYSCALL] {} bails out of the fast path, waits {:?}", caller, events);
        let waited = self.sched_block_until_event(caller, hint, events, timeout, false);
        self.syscall_exit(waited)
    }
}
