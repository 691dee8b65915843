//! Per-core scheduling pool
//!
//! A pool owns one run queue per priority level, the core's idle activation
//! and the identity of the activation currently running there. The queue
//! lock guards every run-queue mutation in the pool; it is always taken
//! after (never before) an activation lock.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use log::trace;

use super::run_queue::{QueueBook, RunQueue};
use super::state::Priority;
use super::stats::PoolStats;
use crate::act::activation::{ActId, Activation};
use crate::act::table::ActivationTable;
use crate::hal::CoreId;
use crate::sched_assert;
use crate::sync::spinlock::{CriticalLock, CriticalLockGuard};

pub struct SchedPool {
    core: CoreId,
    queues: [RunQueue; Priority::LEVELS],
    lock: CriticalLock<QueueBook>,
    /// Mirror of `QueueBook::in_queues` for lock-free readers.
    fill: AtomicUsize,
    idle: AtomicU32,
    current: AtomicU32,
    pub(crate) stats: PoolStats,
}

impl SchedPool {
    pub fn new(core: CoreId) -> Self {
        Self {
            core,
            queues: [RunQueue::new(), RunQueue::new(), RunQueue::new(), RunQueue::new(), RunQueue::new()],
            lock: CriticalLock::new(QueueBook { in_queues: 0 }),
            fill: AtomicUsize::new(0),
            idle: AtomicU32::new(ActId::NONE_RAW),
            current: AtomicU32::new(ActId::NONE_RAW),
            stats: PoolStats::new(),
        }
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub(crate) fn lock(&self) -> &CriticalLock<QueueBook> {
        &self.lock
    }

    pub fn queue(&self, prio: Priority) -> &RunQueue {
        &self.queues[prio.index()]
    }

    /// Activations queued across all levels, read without the lock.
    pub fn queue_fill(&self) -> usize {
        self.fill.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> Option<ActId> {
        ActId::from_raw(self.idle.load(Ordering::Acquire))
    }

    pub(crate) fn set_idle(&self, act: ActId) {
        self.idle.store(act.raw(), Ordering::Release);
    }

    /// Activation running on this core. Readable from any core.
    pub fn current(&self) -> Option<ActId> {
        ActId::from_raw(self.current.load(Ordering::Acquire))
    }

    pub(crate) fn set_current(&self, act: ActId) {
        self.current.store(act.raw(), Ordering::Release);
    }

    fn publish(&self, book: &QueueBook) {
        self.fill.store(book.in_queues, Ordering::Release);
    }

    /// Queue `act` at `level`. Caller holds the activation lock and the
    /// queue lock (`book`).
    pub(crate) fn enqueue(&self, book: &mut QueueBook, act: &Activation, level: Priority) {
        self.queues[level.index()].add(book, act.id(), &act.link);
        act.link.set_level(level);
        self.publish(book);
    }

    /// Remove `act` from whichever level it sits in.
    ///
    /// Searches without the queue lock, then locks and verifies; if another
    /// core moved the entry in between, starts over. Caller holds the
    /// activation lock but not the queue lock.
    pub(crate) fn dequeue<'a>(
        &'a self,
        acts: &ActivationTable,
        act: &Activation,
        lock: impl Fn(&'a CriticalLock<QueueBook>) -> CriticalLockGuard<'a, QueueBook>,
    ) {
        loop {
            let level = act.link.level();
            let queue = &self.queues[level.index()];
            let found = queue.find(act.id(), act.link.slot());

            let mut book = lock(&self.lock);
            let index = match found {
                Some(index) => index,
                // The picker may have de-boosted it to another level.
                None if act.link.level() != level => continue,
                None => {
                    sched_assert!(false, "activation {} not found in its run queue", act.id());
                    return;
                }
            };
            if queue.remove_at(&mut book, index, act.id(), acts) {
                self.publish(&book);
                return;
            }
            trace!("[SCHED] pool {}: {} moved during delete, retrying", self.core, act.id());
        }
    }

    /// Move a queued activation to `level`. Caller holds the activation lock
    /// and the queue lock.
    pub(crate) fn requeue(&self, book: &mut QueueBook, acts: &ActivationTable, act: &Activation, level: Priority) {
        let from = &self.queues[act.link.level().index()];
        let index = from.find(act.id(), act.link.slot());
        let removed = index.map_or(false, |index| from.remove_at(book, index, act.id(), acts));
        sched_assert!(removed, "activation {} not found in its run queue", act.id());
        self.enqueue(book, act, level);
    }

    /// Choose the next activation to run on this core.
    ///
    /// `Io` is served first and its pick is de-boosted back to its base
    /// level. Then levels are scanned from `High` down; a non-empty level
    /// passes its turn once every few visits if a lower level has work, so
    /// low priorities are never starved. The idle level and finally the idle
    /// activation are used only when nothing else is queued.
    pub(crate) fn pick_next(&self, book: &mut QueueBook, acts: &ActivationTable) -> Option<ActId> {
        self.stats.count_pick();
        if book.in_queues == 0 {
            self.stats.count_idle_pick();
            return self.idle();
        }

        let io = &self.queues[Priority::Io.index()];
        if let Some((index, id)) = io.advance(book) {
            let act = acts.get(id);
            let base = act.link.base();
            if io.remove_at(book, index, id, acts) {
                self.enqueue(book, act, base);
                self.stats.count_io_deboost();
            }
            return Some(id);
        }

        const SCAN: [Priority; 3] = [Priority::High, Priority::Mid, Priority::Low];
        for (i, &level) in SCAN.iter().enumerate() {
            let queue = &self.queues[level.index()];
            if queue.is_empty() {
                continue;
            }
            let lower_has_work = SCAN[i + 1..].iter().any(|&l| !self.queues[l.index()].is_empty());
            if queue.decay_tick(book) && lower_has_work {
                continue;
            }
            return queue.advance(book).map(|(_, id)| id);
        }

        match self.queues[Priority::Idle.index()].advance(book) {
            Some((_, id)) => Some(id),
            None => {
                self.stats.count_idle_pick();
                self.idle()
            }
        }
    }

    /// Check that the counters agree with the queues.
    pub fn check_accounting(&self, book: &QueueBook) -> bool {
        let total: usize = self.queues.iter().map(RunQueue::len).sum();
        total == book.in_queues && total == self.queue_fill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::act::activation::ActStatus;
    use crate::hal::{sim::SimPlatform, Context};
    use crate::ipc::message::MessageQueue;
    use crate::sync::critical::CoreCritical;

    struct Fixture {
        sim: SimPlatform,
        core: CoreCritical,
        acts: ActivationTable,
        pool: SchedPool,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            let acts = ActivationTable::new(n);
            for i in 0..n {
                acts.claim()
                    .unwrap()
                    .init("t", Context(i as u64 + 1), ActStatus::Alive, MessageQueue::new(2));
            }
            Self { sim: SimPlatform::new(), core: CoreCritical::new(), acts, pool: SchedPool::new(0) }
        }

        fn add(&self, id: u32, prio: Priority) {
            let act = self.acts.get(ActId(id));
            act.link.set_base(if prio.is_base() { prio } else { Priority::Mid });
            let mut book = self.pool.lock().lock(&self.core, &self.sim);
            self.pool.enqueue(&mut book, act, prio);
        }

        fn pick(&self) -> Option<ActId> {
            let mut book = self.pool.lock().lock(&self.core, &self.sim);
            self.pool.pick_next(&mut book, &self.acts)
        }

        fn delete(&self, id: u32) {
            self.pool
                .dequeue(&self.acts, self.acts.get(ActId(id)), |l| l.lock(&self.core, &self.sim));
        }
    }

    #[test]
    fn test_empty_pool_picks_idle() {
        let fx = Fixture::new(2);
        assert_eq!(fx.pick(), None);
        fx.pool.set_idle(ActId(1));
        assert_eq!(fx.pick(), Some(ActId(1)));
        assert_eq!(fx.pool.stats.snapshot().idle_picks, 2);
    }

    #[test]
    fn test_io_served_first_then_deboosted() {
        let fx = Fixture::new(3);
        fx.add(0, Priority::High);
        fx.add(1, Priority::Io);
        assert_eq!(fx.pick(), Some(ActId(1)));
        let act = fx.acts.get(ActId(1));
        assert_eq!(act.link.level(), Priority::Mid);
        assert!(fx.pool.queue(Priority::Io).is_empty());
        assert!(fx.pool.queue(Priority::Mid).contains(ActId(1)));
        assert_eq!(fx.pool.stats.snapshot().io_deboosts, 1);
    }

    #[test]
    fn test_high_yields_to_low_periodically() {
        let fx = Fixture::new(2);
        fx.add(0, Priority::High);
        fx.add(1, Priority::Low);
        let picks: Vec<_> = (0..8).map(|_| fx.pick().unwrap()).collect();
        let low = picks.iter().filter(|&&id| id == ActId(1)).count();
        assert_eq!(low, 2);
        assert_eq!(picks[3], ActId(1));
        assert_eq!(picks[7], ActId(1));
    }

    #[test]
    fn test_idle_level_only_when_nothing_else() {
        let fx = Fixture::new(2);
        fx.add(0, Priority::Idle);
        fx.add(1, Priority::Low);
        for _ in 0..8 {
            assert_eq!(fx.pick(), Some(ActId(1)));
        }
        fx.delete(1);
        assert_eq!(fx.pick(), Some(ActId(0)));
    }

    #[test]
    fn test_dequeue_keeps_accounting() {
        let fx = Fixture::new(4);
        for id in 0..4 {
            fx.add(id, Priority::Mid);
        }
        fx.delete(0);
        fx.delete(3);
        assert_eq!(fx.pool.queue_fill(), 2);
        let book = fx.pool.lock().lock(&fx.core, &fx.sim);
        assert!(fx.pool.check_accounting(&book));
    }

    #[test]
    fn test_dequeue_after_deboost_finds_new_level() {
        let fx = Fixture::new(2);
        fx.add(0, Priority::Io);
        // Stale level: the picker de-boosts to Mid, the link follows.
        assert_eq!(fx.pick(), Some(ActId(0)));
        fx.delete(0);
        assert_eq!(fx.pool.queue_fill(), 0);
    }

    #[test]
    fn test_requeue_moves_level() {
        let fx = Fixture::new(1);
        fx.add(0, Priority::Low);
        {
            let mut book = fx.pool.lock().lock(&fx.core, &fx.sim);
            fx.pool.requeue(&mut book, &fx.acts, fx.acts.get(ActId(0)), Priority::High);
            assert!(fx.pool.check_accounting(&book));
        }
        assert!(fx.pool.queue(Priority::High).contains(ActId(0)));
        assert!(fx.pool.queue(Priority::Low).is_empty());
    }

    #[test]
    #[should_panic(expected = "not found in its run queue")]
    fn test_dequeue_unqueued_is_fatal() {
        let fx = Fixture::new(1);
        fx.delete(0);
    }
}
