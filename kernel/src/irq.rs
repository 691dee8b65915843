//! Interrupt routing
//!
//! Each core has [`INTERRUPT_LINES`] device lines. A line is owned by the
//! activation that registered it; when it fires the line is masked, a
//! message `{v0, args: [arg, line, 0, 0]}` is queued for the owner and the
//! owner is boosted. The owner re-enables the line once it has serviced it.
//!
//! Interrupts reported while the core is inside a critical section are
//! latched and dispatched by [`Kernel::exit_critical_path`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, trace, warn};

use crate::act::activation::ActId;
use crate::config::{INTERRUPT_LINES, TIMER_CAUSE};
use crate::hal::{Context, CoreId, Platform};
use crate::ipc::message::Message;
use crate::kernel::Kernel;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::sync::spinlock::CriticalLock;

/// Handler registration of one line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqRegistration {
    pub target: Option<ActId>,
    pub v0: u64,
    pub arg: u64,
    pub enabled: bool,
}

type CoreLines = [IrqRegistration; INTERRUPT_LINES];

pub struct InterruptTable {
    cores: Box<[CriticalLock<CoreLines>]>,
}

impl InterruptTable {
    pub fn new(cores: usize) -> Self {
        let lines: Vec<CriticalLock<CoreLines>> =
            (0..cores).map(|_| CriticalLock::new([IrqRegistration::default(); INTERRUPT_LINES])).collect();
        Self { cores: lines.into_boxed_slice() }
    }
}

impl<P: Platform> Kernel<P> {
    fn check_line(&self, core: CoreId, line: usize) -> SchedulerResult<()> {
        self.check_core(core)?;
        if line >= INTERRUPT_LINES {
            return Err(SchedulerError::InvalidInterruptLine { line });
        }
        Ok(())
    }

    /// Route `line` of `core` to `owner`, enabled.
    pub fn irq_register(&self, owner: ActId, core: CoreId, line: usize, v0: u64, arg: u64) -> SchedulerResult<()> {
        self.check_line(core, line)?;
        self.acts.lookup(owner)?;
        let mut lines = self.lock(&self.irqs.cores[core]);
        let reg = &mut lines[line];
        match reg.target {
            Some(current) if current != owner => {
                return Err(SchedulerError::InterruptLineOwned { line, owner: current.raw() })
            }
            _ => {}
        }
        *reg = IrqRegistration { target: Some(owner), v0, arg, enabled: true };
        debug!("[IRQ] core {} line {} -> {}", core, line, owner);
        Ok(())
    }

    /// Unmask `line` after servicing it. Only its owner may do so.
    pub fn irq_enable(&self, owner: ActId, core: CoreId, line: usize) -> SchedulerResult<()> {
        self.check_line(core, line)?;
        let mut lines = self.lock(&self.irqs.cores[core]);
        let reg = &mut lines[line];
        match reg.target {
            None => Err(SchedulerError::InterruptLineUnregistered { line }),
            Some(current) if current != owner => {
                Err(SchedulerError::InterruptLineOwned { line, owner: current.raw() })
            }
            Some(_) => {
                reg.enabled = true;
                Ok(())
            }
        }
    }

    pub fn irq_registration(&self, core: CoreId, line: usize) -> SchedulerResult<IrqRegistration> {
        self.check_line(core, line)?;
        Ok(self.lock(&self.irqs.cores[core])[line])
    }

    /// Drop every line registered to `id`.
    pub(crate) fn irq_release_owner(&self, id: ActId) {
        for core in self.irqs.cores.iter() {
            let mut lines = self.lock(core);
            for reg in lines.iter_mut().filter(|reg| reg.target == Some(id)) {
                *reg = IrqRegistration::default();
            }
        }
    }

    /// Interrupt entry for the calling core. `pending` has bit `n` set for
    /// device line `n` and [`TIMER_CAUSE`] for the timer.
    pub fn kernel_interrupt(&self, pending: u64) {
        let core = self.core_id();
        let critical = &self.critical[core];
        if critical.level() > 0 {
            critical.latch(pending);
            trace!("[IRQ] core {} in critical section, latched {:#x}", core, pending);
            return;
        }
        self.dispatch_interrupts(core, pending);
    }

    fn dispatch_interrupts(&self, core: CoreId, pending: u64) {
        if pending & TIMER_CAUSE != 0 {
            self.kernel_timer();
        }
        for line in (0..INTERRUPT_LINES).filter(|line| pending & (1 << line) != 0) {
            let reg = {
                let mut lines = self.lock(&self.irqs.cores[core]);
                let reg = lines[line];
                lines[line].enabled = false;
                reg
            };
            let Some(target) = reg.target else {
                warn!("[IRQ] core {} line {} fired with no handler", core, line);
                continue;
            };
            if !reg.enabled {
                trace!("[IRQ] core {} line {} masked", core, line);
                continue;
            }
            let Some(act) = self.acts.try_get(target) else { continue };
            let msg = Message::new(reg.v0).with_args([reg.arg, line as u64, 0, 0]);
            if let Err(err) = self.msg_enqueue(act, msg) {
                warn!("[IRQ] core {} line {} dropped: {}", core, line, err);
                continue;
            }
            self.sched_got_int(target, core);
        }
    }

    /// Leave the kernel on the calling core: dispatch interrupts latched
    /// during critical sections once none is open.
    ///
    /// Dispatch reschedules in exception mode. This path is a plain return,
    /// so if the replay moved the core to another activation the switch is
    /// issued here.
    pub fn exit_critical_path(&self) {
        let core = self.core_id();
        let critical = &self.critical[core];
        if critical.level() != 0 {
            return;
        }
        let pending = critical.take_delayed();
        if pending == 0 {
            return;
        }
        debug!("[IRQ] core {} replaying latched {:#x}", core, pending);
        let before = self.current_act(core);
        self.dispatch_interrupts(core, pending);
        let after = self.current_act(core);
        if let Some(to) = after.filter(|_| after != before) {
            let from = before.map_or(Context::BOOT, |id| self.acts.get(id).context());
            trace!("[IRQ] core {} replay switched {:?} -> {}", core, before, to);
            self.platform().context_switch(from, self.acts.get(to).context());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::act::ActSpec;
    use crate::config::KernelConfig;
    use crate::hal::sim::SimPlatform;
    use crate::scheduler::state::{Events, Priority, SchedStatus};

    fn kernel() -> Kernel<SimPlatform> {
        Kernel::new(SimPlatform::new(), KernelConfig::new().with_max_activations(8)).unwrap()
    }

    #[test]
    fn test_register_checks_line_and_owner() {
        let k = kernel();
        let a = k.act_register(ActSpec::new("a", Context(1))).unwrap();
        let b = k.act_register(ActSpec::new("b", Context(2))).unwrap();
        assert_eq!(
            k.irq_register(a, 0, INTERRUPT_LINES, 0, 0),
            Err(SchedulerError::InvalidInterruptLine { line: INTERRUPT_LINES })
        );
        k.irq_register(a, 0, 2, 0x40, 7).unwrap();
        assert_eq!(
            k.irq_register(b, 0, 2, 0, 0),
            Err(SchedulerError::InterruptLineOwned { line: 2, owner: a.raw() })
        );
        assert_eq!(
            k.irq_enable(b, 0, 2),
            Err(SchedulerError::InterruptLineOwned { line: 2, owner: a.raw() })
        );
        assert_eq!(k.irq_enable(a, 0, 3), Err(SchedulerError::InterruptLineUnregistered { line: 3 }));
    }

    #[test]
    fn test_dispatch_messages_masks_and_boosts() {
        let k = kernel();
        k.act_create_idle(0, Context(100)).unwrap();
        let drv = k.act_register(ActSpec::new("drv", Context(1)).priority(Priority::Low)).unwrap();
        k.irq_register(drv, 0, 1, 0x40, 7).unwrap();
        k.sched_block(drv, Events::MESSAGE);

        k.kernel_interrupt(1 << 1);

        let msg = k.msg_pop(drv).unwrap().unwrap();
        assert_eq!(msg.v0, 0x40);
        assert_eq!(msg.args, [7, 1, 0, 0]);
        assert!(!k.irq_registration(0, 1).unwrap().enabled);
        // Preempted in exception mode: bookkeeping only.
        assert_eq!(k.sched_status(drv).unwrap(), SchedStatus::Running);
        assert_eq!(k.current_act(0), Some(drv));
        assert_eq!(k.acts().get(drv).link.level(), Priority::Low);

        // Masked until the driver re-enables it.
        k.kernel_interrupt(1 << 1);
        assert_eq!(k.msg_fill(drv).unwrap(), 0);
        k.irq_enable(drv, 0, 1).unwrap();
        assert!(k.irq_registration(0, 1).unwrap().enabled);
    }

    #[test]
    fn test_unregistered_line_skipped() {
        let k = kernel();
        k.kernel_interrupt(1 << 4);
        assert_eq!(k.irq_registration(0, 4).unwrap(), IrqRegistration::default());
    }

    #[test]
    fn test_latched_in_critical_section() {
        let k = kernel();
        k.act_create_idle(0, Context(100)).unwrap();
        let drv = k.act_register(ActSpec::new("drv", Context(1))).unwrap();
        k.irq_register(drv, 0, 0, 1, 2).unwrap();
        {
            let _cs = k.enter_critical();
            k.kernel_interrupt(1);
            assert_eq!(k.msg_fill(drv).unwrap(), 0);
            assert_eq!(k.core_critical(0).pending(), 1);
            // Still nested: nothing replayed.
            k.exit_critical_path();
            assert_eq!(k.msg_fill(drv).unwrap(), 0);
        }
        k.exit_critical_path();
        assert_eq!(k.msg_fill(drv).unwrap(), 1);
        assert_eq!(k.core_critical(0).pending(), 0);
    }

    #[test]
    fn test_replayed_preemption_switches_context() {
        let k = kernel();
        k.act_create_idle(0, Context(100)).unwrap();
        let busy = k.act_register(ActSpec::new("busy", Context(1)).priority(Priority::High)).unwrap();
        let drv = k.act_register(ActSpec::new("drv", Context(2)).priority(Priority::Low)).unwrap();
        k.irq_register(drv, 0, 3, 0x9, 0).unwrap();
        k.sched_reschedule(Some(busy), false);
        k.platform().take_events();

        {
            let _cs = k.enter_critical();
            k.kernel_interrupt(1 << 3);
        }
        assert_eq!(k.current_act(0), Some(busy));
        k.exit_critical_path();

        assert_eq!(k.current_act(0), Some(drv));
        assert_eq!(k.platform().switches(), vec![(Context(1), Context(2))]);
        // Nothing left to replay: a second exit does not switch again.
        k.exit_critical_path();
        assert_eq!(k.platform().switches().len(), 1);
    }

    #[test]
    fn test_terminate_releases_lines() {
        let k = kernel();
        k.act_create_idle(0, Context(100)).unwrap();
        let drv = k.act_register(ActSpec::new("drv", Context(1))).unwrap();
        k.irq_register(drv, 0, 5, 0, 0).unwrap();
        k.act_terminate(drv).unwrap();
        assert_eq!(k.irq_registration(0, 5).unwrap().target, None);
    }
}
