//! Kernel semaphores and mutexes
//!
//! Waiters are chained through the activations' `sem_next` links in FIFO
//! order, so waiting never allocates. Lock order: semaphore lock, then the
//! waiter's activation lock.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use log::trace;

use super::spinlock::CriticalLock;
use crate::act::activation::{ActId, ActStatus};
use crate::hal::Platform;
use crate::kernel::Kernel;
use crate::scheduler::core::error::{SchedulerError, SchedulerResult};
use crate::scheduler::state::Events;

#[derive(Debug)]
struct WaitList {
    first: Option<ActId>,
    last: Option<ActId>,
    level: usize,
}

/// Counting semaphore.
pub struct Semaphore {
    inner: CriticalLock<WaitList>,
}

impl Semaphore {
    pub const fn new(level: usize) -> Self {
        Self { inner: CriticalLock::new(WaitList { first: None, last: None, level }) }
    }
}

/// Recursive mutex. Only the owner may release it; a release with waiters
/// hands ownership straight to the oldest one.
pub struct KMutex {
    sem: Semaphore,
    owner: AtomicU32,
    depth: AtomicUsize,
}

impl KMutex {
    pub const fn new() -> Self {
        Self { sem: Semaphore::new(1), owner: AtomicU32::new(ActId::NONE_RAW), depth: AtomicUsize::new(0) }
    }

    pub fn owner(&self) -> Option<ActId> {
        ActId::from_raw(self.owner.load(Ordering::Acquire))
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn take(&self, who: ActId) {
        self.owner.store(who.raw(), Ordering::Release);
        self.depth.store(1, Ordering::Release);
    }
}

impl Default for KMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Kernel<P> {
    /// Current count of `sem`.
    pub fn semaphore_level(&self, sem: &Semaphore) -> usize {
        self.lock(&sem.inner).level
    }

    /// Decrement without blocking. Returns whether it succeeded.
    pub fn semaphore_try_wait(&self, sem: &Semaphore) -> bool {
        let mut list = self.lock(&sem.inner);
        if list.level > 0 {
            list.level -= 1;
            true
        } else {
            false
        }
    }

    /// Decrement, blocking `waiter` until signalled if the count is zero.
    ///
    /// Returns `true` if the count was taken immediately, `false` if
    /// `waiter` blocked and was later handed the count by a signal.
    pub fn semaphore_wait(&self, sem: &Semaphore, waiter: ActId) -> bool {
        let act = self.acts.get(waiter);
        let mut list = self.lock(&sem.inner);
        if list.level > 0 {
            list.level -= 1;
            return true;
        }

        act.set_sem_next(None);
        match list.last {
            Some(last) => self.acts.get(last).set_sem_next(Some(waiter)),
            None => list.first = Some(waiter),
        }
        list.last = Some(waiter);
        {
            let mut st = self.lock(&act.sched);
            self.block_locked(act, &mut st, Events::SEMAPHORE);
        }
        drop(list);
        trace!("[SYNC] {} waits on semaphore", waiter);

        self.sched_reschedule(None, false);
        false
    }

    /// Wake the oldest live waiter, or increment the count if there is none.
    ///
    /// Returns the activation that was handed the count.
    pub fn semaphore_signal(&self, sem: &Semaphore) -> Option<ActId> {
        let mut list = self.lock(&sem.inner);
        while let Some(first) = list.first {
            let act = self.acts.get(first);
            list.first = act.sem_next();
            if list.first.is_none() {
                list.last = None;
            }
            act.set_sem_next(None);
            if act.status() == ActStatus::Terminated {
                continue;
            }
            drop(list);
            self.sched_receive_event(first, Events::SEMAPHORE);
            return Some(first);
        }
        list.level += 1;
        None
    }

    /// Acquire `mutex` for `who`, blocking while another activation owns it.
    pub fn mutex_lock(&self, mutex: &KMutex, who: ActId) {
        if mutex.owner() == Some(who) {
            mutex.depth.fetch_add(1, Ordering::AcqRel);
            return;
        }
        if self.semaphore_wait(&mutex.sem, who) {
            mutex.take(who);
        }
    }

    pub fn mutex_try_lock(&self, mutex: &KMutex, who: ActId) -> bool {
        if mutex.owner() == Some(who) {
            mutex.depth.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        if self.semaphore_try_wait(&mutex.sem) {
            mutex.take(who);
            return true;
        }
        false
    }

    /// Release one level of `who`'s hold on `mutex`.
    pub fn mutex_unlock(&self, mutex: &KMutex, who: ActId) -> SchedulerResult<()> {
        if mutex.owner() != Some(who) {
            return Err(SchedulerError::NotMutexOwner { id: who.raw() });
        }
        if mutex.depth.fetch_sub(1, Ordering::AcqRel) > 1 {
            return Ok(());
        }
        mutex.owner.store(ActId::NONE_RAW, Ordering::Release);
        if let Some(next) = self.semaphore_signal(&mutex.sem) {
            mutex.take(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::act::ActSpec;
    use crate::config::KernelConfig;
    use crate::hal::{sim::SimPlatform, Context};
    use crate::scheduler::state::SchedStatus;

    fn kernel() -> (Kernel<SimPlatform>, ActId, ActId, ActId) {
        let k = Kernel::new(SimPlatform::new(), KernelConfig::new().with_max_activations(8)).unwrap();
        k.act_create_idle(0, Context(100)).unwrap();
        let a = k.act_register(ActSpec::new("a", Context(1))).unwrap();
        let b = k.act_register(ActSpec::new("b", Context(2))).unwrap();
        let c = k.act_register(ActSpec::new("c", Context(3))).unwrap();
        (k, a, b, c)
    }

    #[test]
    fn test_counting() {
        let (k, a, _, _) = kernel();
        let sem = Semaphore::new(2);
        assert!(k.semaphore_wait(&sem, a));
        assert!(k.semaphore_try_wait(&sem));
        assert!(!k.semaphore_try_wait(&sem));
        assert_eq!(k.semaphore_signal(&sem), None);
        assert_eq!(k.semaphore_level(&sem), 1);
    }

    #[test]
    fn test_waiters_fifo() {
        let (k, a, b, c) = kernel();
        let sem = Semaphore::new(0);
        assert!(!k.semaphore_wait(&sem, a));
        assert!(!k.semaphore_wait(&sem, b));
        assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Blocked(Events::SEMAPHORE));

        assert_eq!(k.semaphore_signal(&sem), Some(a));
        assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Runnable);
        assert_eq!(k.sched_status(b).unwrap(), SchedStatus::Blocked(Events::SEMAPHORE));

        assert!(!k.semaphore_wait(&sem, c));
        assert_eq!(k.semaphore_signal(&sem), Some(b));
        assert_eq!(k.semaphore_signal(&sem), Some(c));
        assert_eq!(k.semaphore_signal(&sem), None);
        assert_eq!(k.semaphore_level(&sem), 1);
    }

    #[test]
    fn test_signal_skips_terminated_waiter() {
        let (k, a, b, _) = kernel();
        let sem = Semaphore::new(0);
        k.semaphore_wait(&sem, a);
        k.semaphore_wait(&sem, b);
        k.act_terminate(a).unwrap();
        assert_eq!(k.semaphore_signal(&sem), Some(b));
    }

    #[test]
    fn test_mutex_recursion_and_handoff() {
        let (k, a, b, _) = kernel();
        let m = KMutex::new();
        k.mutex_lock(&m, a);
        k.mutex_lock(&m, a);
        assert_eq!(m.depth(), 2);
        assert!(!k.mutex_try_lock(&m, b));

        k.mutex_lock(&m, b);
        assert_eq!(k.sched_status(b).unwrap(), SchedStatus::Blocked(Events::SEMAPHORE));
        assert_eq!(k.mutex_unlock(&m, b), Err(SchedulerError::NotMutexOwner { id: b.raw() }));

        k.mutex_unlock(&m, a).unwrap();
        assert_eq!(m.owner(), Some(a));
        k.mutex_unlock(&m, a).unwrap();
        assert_eq!(m.owner(), Some(b));
        assert_eq!(k.sched_status(b).unwrap(), SchedStatus::Runnable);

        k.mutex_unlock(&m, b).unwrap();
        assert_eq!(m.owner(), None);
        assert!(k.mutex_try_lock(&m, a));
    }
}
