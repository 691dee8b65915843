//! Activations
//!
//! Registration, sealed references and lifecycle (revoke, terminate).
//!
//! Two references are handed out per activation, both sealed by the kernel:
//! the plain reference, used to send messages, and the control reference,
//! which additionally allows status queries, revocation and termination.

pub mod activation;
pub mod table;

pub use activation::{ActId, ActName, ActStatus, Activation, SchedState, Timeout};
pub use table::ActivationTable;

use log::info;

use crate::cap::{Capability, Perms};
use crate::hal::{Context, CoreId, Platform};
use crate::ipc::message::MessageQueue;
use crate::kernel::Kernel;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::state::Priority;

/// Parameters of a new activation.
#[derive(Debug, Clone, Copy)]
pub struct ActSpec<'a> {
    pub name: &'a str,
    pub context: Context,
    pub core: CoreId,
    pub priority: Priority,
    /// Message queue length; the configured default when `None`
    pub queue_len: Option<usize>,
    pub status: ActStatus,
}

impl<'a> ActSpec<'a> {
    pub fn new(name: &'a str, context: Context) -> Self {
        Self {
            name,
            context,
            core: 0,
            priority: Priority::DEFAULT,
            queue_len: None,
            status: ActStatus::Alive,
        }
    }

    pub fn on_core(self, core: CoreId) -> Self {
        Self { core, ..self }
    }

    pub fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    pub fn queue_len(self, len: usize) -> Self {
        Self { queue_len: Some(len), ..self }
    }

    pub fn status(self, status: ActStatus) -> Self {
        Self { status, ..self }
    }
}

impl<P: Platform> Kernel<P> {
    /// Register an activation and hand it to its pool.
    pub fn act_register(&self, spec: ActSpec<'_>) -> SchedulerResult<ActId> {
        self.check_core(spec.core)?;
        if !spec.priority.is_base() {
            return Err(SchedulerError::InvalidPriority { value: spec.priority as u8 });
        }
        let queue_len = spec.queue_len.unwrap_or(self.config().default_queue_len);
        if !queue_len.is_power_of_two() {
            return Err(SchedulerError::InvalidConfig { reason: "message queue length must be a power of two" });
        }

        let act = self.acts.claim().map_err(|err| crate::sched_error!(err))?;
        act.init(spec.name, spec.context, spec.status, MessageQueue::new(queue_len));
        self.sched_create(act, spec.core, spec.priority);
        info!("[ACT] {} '{}' registered on core {}", act.id(), act.name(), spec.core);
        Ok(act.id())
    }

    /// Register the idle activation of `core`.
    pub fn act_create_idle(&self, core: CoreId, context: Context) -> SchedulerResult<ActId> {
        let id = self.act_register(ActSpec::new("idle", context).on_core(core).priority(Priority::Idle))?;
        self.sched_set_idle_act(id, core)?;
        Ok(id)
    }

    fn seal_ref(&self, id: ActId, sealer: &Capability) -> SchedulerResult<Capability> {
        self.acts.lookup(id)?;
        Ok(Capability::new(id.raw() as u64, 1, Perms::GLOBAL).seal(sealer)?)
    }

    /// Sealed reference used to message `id`.
    pub fn act_ref(&self, id: ActId) -> SchedulerResult<Capability> {
        self.seal_ref(id, &self.sealers.act_ref)
    }

    /// Sealed control reference of `id`.
    pub fn act_ctrl_ref(&self, id: ActId) -> SchedulerResult<Capability> {
        self.seal_ref(id, &self.sealers.act_ctrl_ref)
    }

    fn unseal_ref(&self, cap: &Capability, unsealer: &Capability) -> SchedulerResult<&Activation> {
        let cap = cap.unseal(unsealer)?;
        let raw = u32::try_from(cap.base())
            .map_err(|_| SchedulerError::ActivationNotFound { id: ActId::NONE_RAW })?;
        self.acts.lookup(ActId(raw))
    }

    pub(crate) fn resolve_ref(&self, cap: &Capability) -> SchedulerResult<&Activation> {
        self.unseal_ref(cap, &self.sealers.act_ref)
    }

    pub(crate) fn resolve_ctrl(&self, cap: &Capability) -> SchedulerResult<&Activation> {
        self.unseal_ref(cap, &self.sealers.act_ctrl_ref)
    }

    pub fn act_status(&self, id: ActId) -> SchedulerResult<ActStatus> {
        Ok(self.acts.lookup(id)?.status())
    }

    /// Stop honouring references to `id`. It keeps running until terminated.
    pub fn act_revoke(&self, id: ActId) -> SchedulerResult<()> {
        let act = self.acts.lookup(id)?;
        act.status_cell()
            .leave_alive(ActStatus::Revoked)
            .map_err(|_| SchedulerError::TargetNotAlive { id: id.raw() })?;
        info!("[ACT] {} '{}' revoked", id, act.name());
        Ok(())
    }

    /// Terminate `id`: release its interrupt lines and remove it from
    /// scheduling. Terminating the caller's own activation does not return
    /// to it.
    pub fn act_terminate(&self, id: ActId) -> SchedulerResult<()> {
        let act = self.acts.lookup(id)?;
        if act.status() == ActStatus::Terminated {
            return Err(SchedulerError::TargetNotAlive { id: id.raw() });
        }
        act.status_cell().store(ActStatus::Terminated);
        self.irq_release_owner(id);
        info!("[ACT] {} '{}' terminated", id, act.name());
        self.sched_delete(id);
        Ok(())
    }
}
