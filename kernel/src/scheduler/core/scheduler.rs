//! Scheduler operations
//!
//! Lock order: an activation's lock, then its pool's queue lock. Nothing
//! takes an activation lock while holding a queue lock. `reschedule` is the
//! only path holding two activation locks, and both belong to the same pool.
//!
//! A runnable or running activation keeps its run-queue slot; only blocking,
//! termination and priority changes move it. The idle activation of a pool
//! is never queued.

use log::{debug, trace};

use crate::act::activation::{ActId, ActStatus, Activation, SchedState};
use crate::hal::{Context, CoreId, Platform};
use crate::kernel::Kernel;
use crate::sched_assert;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::state::{validate_transition, Events, Priority, SchedStatus};
use crate::scheduler::stats::PoolStatsSnapshot;

impl<P: Platform> Kernel<P> {
    // ═══════════════════════════════════════════════════════════════
    // Queue helpers
    // ═══════════════════════════════════════════════════════════════

    /// Queue `act` at `level` and mark it runnable. Caller holds its lock.
    fn add_to_queue(&self, act: &Activation, st: &mut SchedState, level: Priority) {
        let pool = self.pool(st.pool);
        let mut book = self.lock(pool.lock());
        pool.enqueue(&mut book, act, level);
        drop(book);
        st.status = SchedStatus::Runnable;
    }

    fn delete_from_queue(&self, act: &Activation, st: &SchedState) {
        let pool = self.pool(st.pool);
        pool.dequeue(&self.acts, act, |lock| self.lock(lock));
    }

    fn set_status(st: &mut SchedState, to: SchedStatus) {
        debug_assert!(validate_transition(st.status, to), "bad transition {} -> {}", st.status, to);
        st.status = to;
    }

    // ═══════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════

    /// Give a newly registered activation to the pool of `core`.
    ///
    /// Alive activations start runnable at `prio`; anything else is recorded
    /// as terminated and never queued.
    pub(crate) fn sched_create(&self, act: &Activation, core: CoreId, prio: Priority) {
        let mut st = self.lock(&act.sched);
        sched_assert!(
            st.status == SchedStatus::Terminated && !st.is_idle,
            "activation {} handed to the scheduler twice",
            act.id()
        );
        st.pool = core;
        act.link.set_base(prio);
        if act.status() == ActStatus::Alive {
            self.add_to_queue(act, &mut st, prio);
            debug!("[SCHED] {} '{}' created on pool {} at {}", act.id(), act.name(), core, prio);
        } else {
            st.status = SchedStatus::Terminated;
        }
    }

    /// Make `id` the idle activation of `core`. It leaves the run queues and
    /// is chosen only when they are empty.
    pub fn sched_set_idle_act(&self, id: ActId, core: CoreId) -> SchedulerResult<()> {
        self.check_core(core)?;
        let act = self.acts.lookup(id)?;
        let mut st = self.lock(&act.sched);
        if st.is_queued() {
            self.delete_from_queue(act, &st);
        }
        st.is_idle = true;
        st.pool = core;
        if st.status != SchedStatus::Running {
            st.status = SchedStatus::Runnable;
        }
        self.pool(core).set_idle(id);
        debug!("[SCHED] {} '{}' is idle for pool {}", id, act.name(), core);
        Ok(())
    }

    /// Remove an activation from scheduling for good.
    ///
    /// Deleting the activation running on the calling core switches away
    /// from it and discards its context.
    pub fn sched_delete(&self, id: ActId) {
        let core = self.core_id();
        let act = self.acts.get(id);
        let was_running = {
            let mut st = self.lock(&act.sched);
            if st.status == SchedStatus::Terminated {
                return;
            }
            let running = st.status == SchedStatus::Running;
            sched_assert!(
                !running || st.pool == core,
                "activation {} runs on core {}, cannot delete it from core {}",
                id,
                st.pool,
                core
            );
            if st.is_queued() {
                self.delete_from_queue(act, &st);
            }
            self.timer_unsubscribe(act, &mut st);
            Self::set_status(&mut st, SchedStatus::Terminated);
            running
        };
        debug!("[SCHED] {} '{}' deleted", id, act.name());
        if was_running {
            self.sched_reschedule(None, false);
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Blocking and waking
    // ═══════════════════════════════════════════════════════════════

    /// Block `act` on `events`. Caller holds its lock.
    pub(crate) fn block_locked(&self, act: &Activation, st: &mut SchedState, events: Events) {
        sched_assert!(!events.is_empty(), "activation {} blocked on no event", act.id());
        sched_assert!(
            st.status != SchedStatus::Terminated,
            "blocking terminated activation {}",
            act.id()
        );
        sched_assert!(
            !st.is_idle || self.pool(st.pool).current() == Some(act.id()),
            "idle activation {} blocked while not running",
            act.id()
        );
        if st.is_queued() {
            self.delete_from_queue(act, st);
        }
        Self::set_status(st, SchedStatus::Blocked(events));
    }

    /// Mark `id` as waiting for `events` without switching away from it.
    pub fn sched_block(&self, id: ActId, events: Events) {
        let act = self.acts.get(id);
        let mut st = self.lock(&act.sched);
        self.block_locked(act, &mut st, events);
    }

    /// Deliver `events` to a locked activation.
    ///
    /// Wakes it if it is blocked on any of them, queueing it at `boost` or
    /// its base priority. Otherwise NOTIFY and COMMIT are latched for its
    /// next wait and everything else is dropped. Returns whether it woke.
    pub(crate) fn wake_locked(
        &self,
        act: &Activation,
        st: &mut SchedState,
        events: Events,
        boost: Option<Priority>,
    ) -> bool {
        match st.status {
            SchedStatus::Blocked(waiting) if waiting.intersects(events) => {
                if waiting.contains(Events::TIMEOUT) {
                    self.timer_unsubscribe(act, st);
                }
                st.woke_from = waiting & events;
                if st.is_idle {
                    st.status = SchedStatus::Runnable;
                } else {
                    self.add_to_queue(act, st, boost.unwrap_or_else(|| act.link.base()));
                }
                trace!("[SCHED] {} woke from {:?}", act.id(), st.woke_from);
                true
            }
            _ => {
                if events.contains(Events::NOTIFY) {
                    st.early_notify = true;
                }
                if events.contains(Events::COMMIT) {
                    st.commit_early_notify = true;
                }
                false
            }
        }
    }

    /// Deliver `events` to `id`. Returns whether it woke up.
    pub fn sched_receive_event(&self, id: ActId, events: Events) -> bool {
        let act = self.acts.get(id);
        let mut st = self.lock(&act.sched);
        if events.contains(Events::SYNC_RETURN) {
            act.sync.clear_condition();
        }
        self.wake_locked(act, &mut st, events, None)
    }

    /// Block `id` until one of `events` (or `timeout` ticks, when non-zero)
    /// and switch away, preferring `hint`.
    ///
    /// Returns at once, without blocking, if a latched notification is
    /// pending, a message is already queued, or the awaited sync return has
    /// already happened. Returns the ticks spent waiting when a timeout was
    /// armed, otherwise 0.
    pub fn sched_block_until_event(
        &self,
        id: ActId,
        hint: Option<ActId>,
        events: Events,
        timeout: u64,
        in_exception: bool,
    ) -> u64 {
        let act = self.acts.get(id);
        {
            let mut st = self.lock(&act.sched);

            let early = if events.contains(Events::NOTIFY) && st.early_notify {
                st.early_notify = false;
                Events::NOTIFY
            } else if events.contains(Events::COMMIT) && st.commit_early_notify {
                st.commit_early_notify = false;
                Events::COMMIT
            } else if events.contains(Events::MESSAGE) && act.queue().map_or(false, |q| !q.is_empty()) {
                Events::MESSAGE
            } else if events.contains(Events::SYNC_RETURN) && !act.sync.condition() {
                Events::SYNC_RETURN
            } else {
                Events::empty()
            };
            if !early.is_empty() {
                st.woke_from = early;
                return 0;
            }

            let mut wait = events;
            if timeout != 0 {
                wait |= Events::TIMEOUT;
                self.timer_subscribe(act, &mut st, timeout);
            }
            if wait.is_empty() {
                drop(st);
                self.sched_reschedule(hint, in_exception);
                return 0;
            }
            self.block_locked(act, &mut st, wait);
        }

        self.sched_reschedule(hint, in_exception);

        if timeout == 0 {
            return 0;
        }
        let start = self.lock(&act.sched).timeout.start;
        self.high_res_time().saturating_sub(start)
    }

    // ═══════════════════════════════════════════════════════════════
    // Priorities and interrupts
    // ═══════════════════════════════════════════════════════════════

    /// Change the base priority of `id`. A queued activation moves to the
    /// new level at once unless it is currently boosted.
    pub fn sched_change_prio(&self, id: ActId, prio: Priority) -> SchedulerResult<()> {
        if !prio.is_base() {
            return Err(SchedulerError::InvalidPriority { value: prio as u8 });
        }
        let act = self.acts.lookup(id)?;
        let st = self.lock(&act.sched);
        let pool = self.pool(st.pool);
        let mut book = self.lock(pool.lock());
        act.link.set_base(prio);
        if st.is_queued() && act.link.level() != Priority::Io {
            pool.requeue(&mut book, &self.acts, act, prio);
        }
        Ok(())
    }

    /// An interrupt was delivered to `id` on `core`.
    ///
    /// The activation is boosted to `Io` (woken if it waits for a message)
    /// and, if it belongs to `core`, preempts whatever runs there.
    pub fn sched_got_int(&self, id: ActId, core: CoreId) {
        let act = self.acts.get(id);
        let preempt = {
            let mut st = self.lock(&act.sched);
            match st.status {
                SchedStatus::Blocked(waiting) if waiting.contains(Events::MESSAGE) => {
                    self.wake_locked(act, &mut st, Events::MESSAGE, Some(Priority::Io));
                }
                SchedStatus::Runnable if st.is_queued() && act.link.level() < Priority::Io => {
                    let pool = self.pool(st.pool);
                    let mut book = self.lock(pool.lock());
                    pool.requeue(&mut book, &self.acts, act, Priority::Io);
                }
                _ => {}
            }
            st.pool == core && st.status == SchedStatus::Runnable
        };
        if preempt {
            self.sched_reschedule(Some(id), true);
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Switching
    // ═══════════════════════════════════════════════════════════════

    fn deschedule_locked(st: &mut SchedState) {
        if st.status == SchedStatus::Running {
            st.status = SchedStatus::Runnable;
        }
    }

    fn schedule_locked(&self, core: CoreId, act: &Activation, st: &mut SchedState) {
        sched_assert!(
            st.status == SchedStatus::Runnable,
            "scheduling activation {} which is {}",
            act.id(),
            st.status
        );
        let pool = self.pool(core);
        // A boost lasts until the activation next runs, however it was chosen.
        if st.is_queued() && act.link.level() == Priority::Io {
            let mut book = self.lock(pool.lock());
            pool.requeue(&mut book, &self.acts, act, act.link.base());
            pool.stats.count_io_deboost();
        }
        st.status = SchedStatus::Running;
        pool.set_current(act.id());
        act.count_switch();
    }

    /// Pick the next activation for the calling core and switch to it.
    ///
    /// `hint` is tried first if it is runnable in this core's pool; a hint
    /// owned by another core makes this core yield the hardware thread
    /// briefly instead. With `in_exception` the switch is bookkeeping only:
    /// the exception return path resumes the new current activation.
    pub fn sched_reschedule(&self, hint: Option<ActId>, in_exception: bool) {
        let core = self.core_id();
        let pool = self.pool(core);
        let _section = (!in_exception).then(|| self.enter_critical());

        let mut hint = hint;
        let (to, mut to_st) = loop {
            let candidate = match hint.take() {
                Some(h) => {
                    let Some(act) = self.acts.try_get(h) else { continue };
                    let st = self.lock(&act.sched);
                    if st.pool != core {
                        drop(st);
                        self.platform().hw_yield();
                        continue;
                    }
                    if st.status != SchedStatus::Runnable {
                        continue;
                    }
                    pool.stats.count_hint_hit();
                    Some(h)
                }
                None => {
                    let mut book = self.lock(pool.lock());
                    pool.pick_next(&mut book, &self.acts)
                }
            };

            let Some(id) = candidate else {
                self.fatal(format_args!("nothing to run on core {}", core))
            };
            let act = self.acts.get(id);
            let mut st = self.lock(&act.sched);
            if Some(id) == pool.current() {
                // Woken before it could switch away: it simply keeps the core.
                if st.status == SchedStatus::Runnable {
                    self.schedule_locked(core, act, &mut st);
                }
                return;
            }
            if st.pool == core && st.status == SchedStatus::Runnable {
                break (act, st);
            }
            if Some(id) == pool.idle() {
                // The idle fallback is itself blocked: nothing can ever run here.
                drop(st);
                self.fatal(format_args!("nothing to run on core {}", core))
            }
            trace!("[SCHED] pool {}: pick {} went stale ({}), retrying", core, id, st.status);
        };

        let (from_ctx, dying) = match pool.current() {
            Some(from_id) => {
                let from = self.acts.get(from_id);
                let mut from_st = self.lock(&from.sched);
                Self::deschedule_locked(&mut from_st);
                let dying = from_st.status == SchedStatus::Terminated;
                self.schedule_locked(core, to, &mut to_st);
                (from.context(), dying)
            }
            None => {
                self.schedule_locked(core, to, &mut to_st);
                (Context::BOOT, false)
            }
        };
        drop(to_st);
        pool.stats.count_switch();

        if in_exception {
            return;
        }
        if dying {
            self.platform().destroy_context(from_ctx, to.context());
        } else {
            self.platform().context_switch(from_ctx, to.context());
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════

    pub fn current_act(&self, core: CoreId) -> Option<ActId> {
        self.pool(core).current()
    }

    pub fn queue_fill(&self, core: CoreId) -> usize {
        self.pool(core).queue_fill()
    }

    pub fn sched_status(&self, id: ActId) -> SchedulerResult<SchedStatus> {
        let act = self.acts.lookup(id)?;
        Ok(self.lock(&act.sched).status)
    }

    /// Events that ended the last wait of `id`.
    pub fn woke_from(&self, id: ActId) -> SchedulerResult<Events> {
        let act = self.acts.lookup(id)?;
        Ok(self.lock(&act.sched).woke_from)
    }

    pub fn sched_state(&self, id: ActId) -> SchedulerResult<SchedState> {
        let act = self.acts.lookup(id)?;
        Ok(*self.lock(&act.sched))
    }

    pub fn pool_stats(&self, core: CoreId) -> PoolStatsSnapshot {
        self.pool(core).stats.snapshot()
    }

    /// Whether the counters of `core`'s pool agree with its queues.
    pub fn check_pool_accounting(&self, core: CoreId) -> bool {
        let pool = self.pool(core);
        let book = self.lock(pool.lock());
        pool.check_accounting(&book)
    }

    /// Whether a queue lock of any pool is currently held.
    pub fn any_queue_locked(&self) -> bool {
        self.pools.iter().any(|pool| pool.lock().is_locked())
    }
}
