//! Scénarios d'ordonnancement
//!
//! End-to-end runs of the kernel on the simulated platform: rotation,
//! priorities, blocking and waking, synchronous calls, timeouts and
//! interrupts.

use capsched_kernel::hal::sim::SimPlatform;
use capsched_kernel::sync::Semaphore;
use capsched_kernel::{
    ActId, ActSpec, CallSelector, Context, Events, Kernel, KernelConfig, Message, Priority, ReturnSlot,
    SchedStatus, SchedulerError,
};

fn boot(cores: usize) -> (Kernel<SimPlatform>, Vec<ActId>) {
    let config = KernelConfig::new().with_cores(cores).with_max_activations(32);
    let k = Kernel::new(SimPlatform::new(), config).unwrap();
    let idles = (0..cores)
        .map(|core| k.act_create_idle(core, Context(1000 + core as u64)).unwrap())
        .collect();
    (k, idles)
}

fn spawn(k: &Kernel<SimPlatform>, name: &str, ctx: u64, prio: Priority) -> ActId {
    k.act_register(ActSpec::new(name, Context(ctx)).priority(prio)).unwrap()
}

/// Reschedule `n` times on core 0 and record who ends up current.
fn run(k: &Kernel<SimPlatform>, n: usize) -> Vec<ActId> {
    (0..n)
        .map(|_| {
            k.sched_reschedule(None, false);
            k.current_act(0).unwrap()
        })
        .collect()
}

#[test]
fn same_level_activations_alternate() {
    let (k, idles) = boot(1);
    let x = spawn(&k, "x", 1, Priority::Low);
    let y = spawn(&k, "y", 2, Priority::Low);

    let picks = run(&k, 10);
    assert!(!picks.contains(&idles[0]));
    for pair in picks.windows(2) {
        assert_ne!(pair[0], pair[1], "picks {:?}", picks);
    }
    assert!(picks.contains(&x) && picks.contains(&y));
    assert!(k.check_pool_accounting(0));
}

#[test]
fn every_runnable_activation_runs_within_two_rounds() {
    let (k, _) = boot(1);
    let acts: Vec<ActId> = (0..6).map(|i| spawn(&k, "w", i + 1, Priority::Mid)).collect();
    // Shuffle the queue order with a block/wake round.
    k.sched_block(acts[1], Events::NOTIFY);
    k.sched_receive_event(acts[1], Events::NOTIFY);

    let picks = run(&k, 2 * acts.len());
    for act in &acts {
        assert!(picks.contains(act), "{} never ran: {:?}", act, picks);
    }
}

#[test]
fn higher_level_wins_but_decays() {
    let (k, _) = boot(1);
    let low = spawn(&k, "low", 1, Priority::Low);
    let high = spawn(&k, "high", 2, Priority::High);

    let picks = run(&k, 8);
    assert_eq!(picks.iter().filter(|&&a| a == low).count(), 2, "picks {:?}", picks);
    assert_eq!(picks[0], high);
    assert_eq!(picks[3], low);
}

#[test]
fn idle_runs_only_when_queues_are_empty() {
    let (k, idles) = boot(1);
    let a = spawn(&k, "a", 1, Priority::Mid);
    assert_eq!(run(&k, 1), vec![a]);

    k.msg_wait(a);
    assert_eq!(k.current_act(0), Some(idles[0]));
    assert_eq!(k.queue_fill(0), 0);
    assert_eq!(k.pool_stats(0).idle_picks, 1);

    k.msg_push(a, Message::new(1)).unwrap();
    assert_eq!(run(&k, 1), vec![a]);
}

#[test]
fn sync_return_before_block_does_not_block() {
    let (k, _) = boot(1);
    let client = spawn(&k, "client", 1, Priority::Mid);
    let server = spawn(&k, "server", 2, Priority::Mid);
    k.sched_reschedule(Some(client), false);

    // The server answers before the client gets to block.
    let token = k.sync_token_mint(client).unwrap();
    let ret = ReturnSlot { cap: None, v0: 5, v1: 6 };
    assert_eq!(k.message_reply(Some(token), ret, false), Ok(client));

    let waited = k.sched_block_until_event(client, Some(server), Events::SYNC_RETURN, 0, false);
    assert_eq!(waited, 0);
    assert!(k.sched_status(client).unwrap().is_active());
    assert_eq!(k.current_act(0), Some(client));
    assert_eq!(k.sync_return(client).unwrap(), ret);
}

#[test]
fn sync_return_wakes_blocked_caller() {
    let (k, idles) = boot(1);
    let x = spawn(&k, "x", 1, Priority::Mid);
    k.sched_reschedule(None, false);
    k.sync_token_mint(x).unwrap();

    let waited = k.sched_block_until_event(x, None, Events::SYNC_RETURN, 0, false);
    assert_eq!(waited, 0);
    assert_eq!(k.current_act(0), Some(idles[0]));
    assert_eq!(k.sched_status(x).unwrap(), SchedStatus::Blocked(Events::SYNC_RETURN));

    assert!(k.sched_receive_event(x, Events::SYNC_RETURN));
    assert_eq!(k.sched_status(x).unwrap(), SchedStatus::Runnable);
    assert_eq!(k.woke_from(x).unwrap(), Events::SYNC_RETURN);
    assert_eq!(k.timed_waiters(), 0);
}

#[test]
fn stale_token_is_refused_and_wakes_nobody() {
    let (k, _) = boot(1);
    let client = spawn(&k, "client", 1, Priority::Mid);
    let server = spawn(&k, "server", 2, Priority::Mid);
    k.sched_reschedule(Some(client), false);

    let server_ref = k.act_ref(server).unwrap();
    k.message_send(client, &server_ref, CallSelector::SyncCall, Message::new(1)).unwrap();
    let token = k.msg_pop(server).unwrap().unwrap().sync_token;
    k.message_reply(token, ReturnSlot::default(), false).unwrap();
    assert!(k.sched_status(client).unwrap().is_active());

    // Client issues a second call; the old token must not answer it.
    k.sched_reschedule(Some(client), false);
    k.message_send(client, &server_ref, CallSelector::SyncCall, Message::new(2)).unwrap();
    assert_eq!(k.sched_status(client).unwrap(), SchedStatus::Blocked(Events::SYNC_RETURN));
    assert!(matches!(
        k.message_reply(token, ReturnSlot::default(), false),
        Err(SchedulerError::StaleSyncToken { .. })
    ));
    assert_eq!(k.sched_status(client).unwrap(), SchedStatus::Blocked(Events::SYNC_RETURN));
}

#[test]
fn timeout_fires_once_and_frees_its_slot() {
    let (k, idles) = boot(1);
    k.timer_init();
    let a = spawn(&k, "sleeper", 1, Priority::Mid);
    k.sched_reschedule(None, false);

    k.sched_block_until_event(a, None, Events::MESSAGE, 100, false);
    assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Blocked(Events::MESSAGE | Events::TIMEOUT));
    assert_eq!(k.timed_waiters(), 1);
    assert_eq!(k.current_act(0), Some(idles[0]));

    k.platform().advance(100);
    k.kernel_timer();
    assert_eq!(k.woke_from(a).unwrap(), Events::TIMEOUT);
    assert_eq!(k.timed_waiters(), 0);
    assert_eq!(k.sched_state(a).unwrap().timeout.slot, None);
    assert_eq!(k.current_act(0), Some(a));

    // Later ticks and a late message leave the completed wait alone.
    k.platform().advance(1_000);
    k.kernel_timer();
    k.msg_push(a, Message::new(3)).unwrap();
    assert_eq!(k.woke_from(a).unwrap(), Events::TIMEOUT);
}

#[test]
fn message_cancels_timeout() {
    let (k, _) = boot(1);
    k.timer_init();
    let a = spawn(&k, "a", 1, Priority::Mid);
    k.sched_reschedule(None, false);

    k.sched_block_until_event(a, None, Events::MESSAGE, 100, false);
    k.msg_push(a, Message::new(1)).unwrap();
    assert_eq!(k.woke_from(a).unwrap(), Events::MESSAGE);
    assert_eq!(k.timed_waiters(), 0);

    k.platform().advance(500);
    k.kernel_timer();
    assert_eq!(k.woke_from(a).unwrap(), Events::MESSAGE);
}

#[test]
fn timer_rearms_in_the_future() {
    let (k, _) = boot(1);
    k.timer_init();
    let interval = k.config().timer_interval;
    assert_eq!(k.platform().last_compare(0), Some(interval));

    // Handler runs well past two ticks: the next compare skips ahead.
    k.platform().set_counter(interval * 2 + interval / 2);
    k.kernel_timer();
    assert_eq!(k.platform().last_compare(0), Some(interval * 3));
}

#[test]
fn interrupt_preempts_with_io_boost() {
    let (k, _) = boot(1);
    let busy = spawn(&k, "busy", 1, Priority::High);
    let drv = spawn(&k, "drv", 2, Priority::Low);
    k.sched_reschedule(Some(drv), false);
    k.irq_register(drv, 0, 3, 0x77, 0).unwrap();
    k.msg_wait(drv);
    assert_eq!(k.current_act(0), Some(busy));

    k.kernel_interrupt(1 << 3);
    assert_eq!(k.current_act(0), Some(drv));
    assert_eq!(k.msg_pop(drv).unwrap().map(|m| m.v0), Some(0x77));
    // The boost is spent once the driver runs.
    assert_eq!(k.acts().try_get(drv).unwrap().level(), Priority::Low);
    assert!(k.check_pool_accounting(0));
}

#[test]
fn hint_on_other_core_yields_then_picks_locally() {
    let (k, _) = boot(2);
    let local = spawn(&k, "local", 1, Priority::Mid);
    let remote = k
        .act_register(ActSpec::new("remote", Context(2)).on_core(1))
        .unwrap();

    k.sched_reschedule(Some(remote), false);
    assert_eq!(k.platform().yields(), 1);
    assert_eq!(k.current_act(0), Some(local));

    k.platform().set_core(1);
    k.sched_reschedule(None, false);
    assert_eq!(k.current_act(1), Some(remote));
    assert_eq!(k.current_act(0), Some(local));
}

#[test]
fn terminating_current_destroys_its_context() {
    let (k, idles) = boot(1);
    let a = spawn(&k, "a", 7, Priority::Mid);
    k.sched_reschedule(None, false);
    k.platform().take_events();

    k.act_terminate(a).unwrap();
    assert_eq!(k.current_act(0), Some(idles[0]));
    assert_eq!(k.platform().switches(), vec![(Context(7), Context(1000))]);
    assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Terminated);
}

#[test]
fn semaphore_wakes_waiters_in_order() {
    let (k, _) = boot(1);
    let sem = Semaphore::new(0);
    let a = spawn(&k, "a", 1, Priority::Mid);
    let b = spawn(&k, "b", 2, Priority::Mid);

    assert!(!k.semaphore_wait(&sem, a));
    assert!(!k.semaphore_wait(&sem, b));
    assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Blocked(Events::SEMAPHORE));

    assert_eq!(k.semaphore_signal(&sem), Some(a));
    assert_eq!(k.sched_status(a).unwrap(), SchedStatus::Runnable);
    assert!(k.sched_status(b).unwrap().is_blocked());
    assert_eq!(k.semaphore_signal(&sem), Some(b));
    assert_eq!(k.semaphore_signal(&sem), None);
    assert_eq!(k.semaphore_level(&sem), 1);
}

// ═══════════════════════════════════════════════════════════════
// Fatal paths
// ═══════════════════════════════════════════════════════════════

#[test]
#[should_panic(expected = "nothing to run on core 0")]
fn reschedule_without_idle_is_fatal() {
    let k = Kernel::new(SimPlatform::new(), KernelConfig::new()).unwrap();
    k.sched_reschedule(None, false);
}

#[test]
#[should_panic(expected = "nothing to run on core 0")]
fn blocked_idle_fallback_is_fatal() {
    let (k, idles) = boot(1);
    k.sched_reschedule(None, false);
    assert_eq!(k.current_act(0), Some(idles[0]));
    // The idle activation may wait while it holds the core.
    k.sched_block(idles[0], Events::MESSAGE);

    let a = spawn(&k, "a", 1, Priority::Mid);
    assert_eq!(run(&k, 1), vec![a]);
    // `a` leaves the core with nothing queued and the idle fallback blocked.
    k.msg_wait(a);
}

#[test]
#[should_panic(expected = "blocked while not running")]
fn idle_cannot_be_blocked_from_elsewhere() {
    let (k, idles) = boot(1);
    spawn(&k, "x", 1, Priority::Mid);
    k.sched_reschedule(None, false);
    k.sched_block(idles[0], Events::MESSAGE);
}

#[test]
#[should_panic(expected = "This queue is too small")]
fn sleeper_table_exhaustion_is_fatal() {
    let (k, _) = boot(1);
    k.timer_init();
    for i in 0..17 {
        let id = spawn(&k, "s", i + 1, Priority::Mid);
        k.sched_block_until_event(id, None, Events::MESSAGE, 1_000, false);
    }
}

#[test]
#[should_panic(expected = "cannot delete it from core 1")]
fn deleting_activation_running_on_other_core_is_fatal() {
    let (k, _) = boot(2);
    let a = spawn(&k, "a", 1, Priority::Mid);
    k.sched_reschedule(None, false);
    assert_eq!(k.current_act(0), Some(a));

    k.platform().set_core(1);
    let _ = k.act_terminate(a);
}
