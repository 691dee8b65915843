//! Kernel context
//!
//! [`Kernel`] owns every piece of global kernel state: the activation table,
//! one scheduling pool, critical-section record and clock per core, the
//! sleeper table, the interrupt table and the kernel's sealers. Subsystems
//! add their operations to it in their own `impl` blocks.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use log::{error, info};

use crate::act::table::ActivationTable;
use crate::cap::{Capability, KernelSealers};
use crate::config::KernelConfig;
use crate::hal::{CoreId, Platform};
use crate::irq::InterruptTable;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::pool::SchedPool;
use crate::sync::critical::{CoreCritical, CriticalSection};
use crate::sync::spinlock::{CriticalLock, CriticalLockGuard};
use crate::time::clock::CoreClock;
use crate::time::timer::SleeperTable;

pub struct Kernel<P: Platform> {
    platform: P,
    config: KernelConfig,
    pub(crate) acts: ActivationTable,
    pub(crate) pools: Box<[SchedPool]>,
    pub(crate) critical: Box<[CoreCritical]>,
    pub(crate) clocks: Box<[CoreClock]>,
    pub(crate) sleepers: SleeperTable,
    pub(crate) irqs: InterruptTable,
    pub(crate) sealers: KernelSealers,
}

impl<P: Platform> Kernel<P> {
    /// Bring up kernel state for `config.cores` cores.
    ///
    /// Pools start empty; each core needs an idle activation (see
    /// [`Kernel::act_create_idle`]) before it can reschedule.
    pub fn new(platform: P, config: KernelConfig) -> SchedulerResult<Self> {
        config
            .validate()
            .map_err(|reason| crate::sched_error!(SchedulerError::InvalidConfig { reason }))?;

        let pools: Vec<SchedPool> = (0..config.cores).map(SchedPool::new).collect();
        let critical: Vec<CoreCritical> = (0..config.cores).map(|_| CoreCritical::new()).collect();
        let clocks: Vec<CoreClock> = (0..config.cores).map(|_| CoreClock::new()).collect();
        let sealers = KernelSealers::derive(Capability::root_sealer())?;

        info!(
            "[SCHED] {} core(s), {} activation slots, timer every {} cycles",
            config.cores, config.max_activations, config.timer_interval
        );

        Ok(Self {
            acts: ActivationTable::new(config.max_activations),
            pools: pools.into_boxed_slice(),
            critical: critical.into_boxed_slice(),
            clocks: clocks.into_boxed_slice(),
            sleepers: SleeperTable::new(),
            irqs: InterruptTable::new(config.cores),
            sealers,
            platform,
            config,
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn acts(&self) -> &ActivationTable {
        &self.acts
    }

    pub fn cores(&self) -> usize {
        self.pools.len()
    }

    /// Core executing the caller.
    pub fn core_id(&self) -> CoreId {
        let core = self.platform.core_id();
        crate::sched_assert!(core < self.pools.len(), "core {} was not brought up", core);
        core
    }

    pub fn pool(&self, core: CoreId) -> &SchedPool {
        crate::sched_assert!(core < self.pools.len(), "no pool for core {}", core);
        &self.pools[core]
    }

    pub(crate) fn check_core(&self, core: CoreId) -> SchedulerResult<()> {
        if core < self.pools.len() {
            Ok(())
        } else {
            Err(SchedulerError::CoreNotAvailable { core })
        }
    }

    pub fn core_critical(&self, core: CoreId) -> &CoreCritical {
        &self.critical[core]
    }

    /// Enter a critical section on the calling core.
    pub fn enter_critical(&self) -> CriticalSection<'_> {
        CriticalSection::enter(&self.critical[self.core_id()], &self.platform)
    }

    /// Take `lock` inside a critical section of the calling core.
    pub(crate) fn lock<'a, T>(&'a self, lock: &'a CriticalLock<T>) -> CriticalLockGuard<'a, T> {
        lock.lock(&self.critical[self.core_id()], &self.platform)
    }

    /// Log every activation's state and halt.
    pub fn fatal(&self, reason: fmt::Arguments<'_>) -> ! {
        error!("[SCHED] fatal: {}", reason);
        self.dump_activations();
        panic!("[SCHED CRITICAL] {}", reason);
    }

    pub fn dump_activations(&self) {
        for pool in self.pools.iter() {
            error!(
                "[SCHED] pool {}: current {:?}, idle {:?}, {} queued",
                pool.core(),
                pool.current(),
                pool.idle(),
                pool.queue_fill()
            );
        }
        for act in self.acts.iter() {
            match act.sched.try_lock(&self.critical[self.core_id()], &self.platform) {
                Some(st) => error!(
                    "[SCHED]   {} {:<16} {:?} pool {} {} at {}",
                    act.id(),
                    act.name(),
                    act.status(),
                    st.pool,
                    st.status,
                    act.link.level()
                ),
                None => error!("[SCHED]   {} {:<16} <locked>", act.id(), act.name()),
            }
        }
    }
}
