/*
 * Semaphore scenario tests: FIFO wakeup order, deletion and reset
 * semantics, non-blocking and timed waits, and the interaction between
 * kill and a parked waiter.
 */

mod common;

use common::{labels, record, values_of};
use corten::params::{DEFAULT_STACK, NSEM};
use corten::proc::{self, Pid, ProcState};
use corten::sem::{self, SemId};
use corten::{KernelError, clock};
use rusty_fork::rusty_fork_test;

extern "C" fn sem_waiter(sid: u64, id: u64) {
    record("wait-start", id);
    match sem::wait(SemId(sid as usize)) {
        Ok(()) => record("woke", id),
        Err(KernelError::Deleted) => record("deleted", id),
        Err(e) => panic!("unexpected wait error: {e}"),
    }
}

extern "C" fn triple_signaller(sid: u64, _b: u64) {
    let s = SemId(sid as usize);
    for _ in 0..3 {
        sem::signal(s).unwrap();
        record("signalled", 0);
    }
}

extern "C" fn timed_waiter(sid: u64, ms: u64) {
    match sem::timed_wait(SemId(sid as usize), ms as u32) {
        Ok(()) => record("timed-ok", clock::ticks()),
        Err(KernelError::Timeout) => record("timed-out", clock::ticks()),
        Err(e) => panic!("unexpected timed wait error: {e}"),
    }
}

fn spawn_waiter(sid: SemId, id: u64) -> Pid {
    let pid = proc::create(sem_waiter, DEFAULT_STACK, 40, "waiter", sid.0 as u64, id).unwrap();
    proc::resume(pid).unwrap();
    pid
}

rusty_fork_test! {
    #[test]
    fn waiters_wake_in_fifo_order() {
        corten::init();
        let s = sem::create(0).unwrap();
        for id in 1..=3 {
            spawn_waiter(s, id);
        }
        assert_eq!(sem::count(s).unwrap(), -3);
        assert_eq!(sem::info(s).unwrap(), (-3, 3));
        corten::integrity_check().unwrap();

        let ctl = proc::create(triple_signaller, DEFAULT_STACK, 60, "ctl", s.0 as u64, 0)
            .unwrap();
        proc::resume(ctl).unwrap();

        // The controller outranks the waiters, so all three signals land
        // before any waiter runs; the wake order is pure FIFO.
        assert_eq!(values_of("wait-start"), [1, 2, 3]);
        assert_eq!(values_of("woke"), [1, 2, 3]);
        assert_eq!(sem::count(s).unwrap(), 0);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn deletion_wakes_every_waiter_with_an_error() {
        corten::init();
        let s = sem::create(0).unwrap();
        spawn_waiter(s, 1);
        spawn_waiter(s, 2);
        sem::delete(s).unwrap();

        assert_eq!(values_of("deleted"), [1, 2]);
        assert!(values_of("woke").is_empty());
        // The slot is free again.
        assert_eq!(sem::count(s), Err(KernelError::BadSemId));
        assert_eq!(sem::signal(s), Err(KernelError::BadSemId));
        corten::integrity_check().unwrap();
    }

    #[test]
    fn reset_releases_waiters_and_installs_fresh_count() {
        corten::init();
        let s = sem::create(0).unwrap();
        spawn_waiter(s, 1);
        sem::reset(s, 3).unwrap();

        assert_eq!(values_of("deleted"), [1]);
        // Still allocated, now with the new count.
        assert_eq!(sem::count(s).unwrap(), 3);
        sem::try_wait(s).unwrap();
        assert_eq!(sem::count(s).unwrap(), 2);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn try_wait_never_blocks() {
        corten::init();
        let s = sem::create(2).unwrap();
        sem::try_wait(s).unwrap();
        sem::try_wait(s).unwrap();
        assert_eq!(sem::try_wait(s), Err(KernelError::WouldBlock));
        assert_eq!(sem::count(s).unwrap(), 0);
        sem::signal(s).unwrap();
        sem::try_wait(s).unwrap();

        // Acquire then release on a binary semaphore leaves the count
        // where it started.
        let bin = sem::create(1).unwrap();
        sem::try_wait(bin).unwrap();
        sem::signal(bin).unwrap();
        assert_eq!(sem::count(bin).unwrap(), 1);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn signal_n_is_n_signals_with_one_reschedule() {
        corten::init();
        let s = sem::create(0).unwrap();
        for id in 1..=3 {
            spawn_waiter(s, id);
        }
        assert_eq!(sem::signal_n(s, 0), Err(KernelError::BadArgument));
        sem::signal_n(s, 3).unwrap();
        assert_eq!(values_of("woke"), [1, 2, 3]);
        assert_eq!(sem::count(s).unwrap(), 0);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn timed_wait_expires_and_compensates_the_count() {
        corten::init();
        let s = sem::create(0).unwrap();
        let w = proc::create(timed_waiter, DEFAULT_STACK, 40, "tw", s.0 as u64, 5).unwrap();
        proc::resume(w).unwrap();
        assert_eq!(sem::count(s).unwrap(), -1);

        for _ in 0..5 {
            clock::tick();
        }
        // The deadline fired on the fifth tick and the vanished waiter
        // reads as an absorbed signal.
        assert_eq!(values_of("timed-out"), [5]);
        assert_eq!(sem::count(s).unwrap(), 0);
        assert_eq!(sem::info(s).unwrap(), (0, 0));
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Free);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn timed_wait_signalled_before_the_deadline() {
        corten::init();
        let s = sem::create(0).unwrap();
        let w = proc::create(timed_waiter, DEFAULT_STACK, 40, "tw", s.0 as u64, 50).unwrap();
        proc::resume(w).unwrap();

        clock::tick();
        clock::tick();
        sem::signal(s).unwrap();
        assert_eq!(values_of("timed-ok"), [2]);
        assert_eq!(sem::count(s).unwrap(), 0);

        // The armed deadline died with the wait; later ticks are inert.
        for _ in 0..60 {
            clock::tick();
        }
        assert_eq!(sem::count(s).unwrap(), 0);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn timed_wait_with_available_count_does_not_arm_anything() {
        corten::init();
        let s = sem::create(1).unwrap();
        let w = proc::create(timed_waiter, DEFAULT_STACK, 40, "tw", s.0 as u64, 5).unwrap();
        proc::resume(w).unwrap();
        assert_eq!(values_of("timed-ok"), [0]);
        assert_eq!(sem::count(s).unwrap(), 0);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn killing_a_waiter_detaches_it_and_adjusts_the_count() {
        corten::init();
        let s = sem::create(0).unwrap();
        let w1 = spawn_waiter(s, 1);
        let w2 = spawn_waiter(s, 2);
        assert_eq!(sem::count(s).unwrap(), -2);

        proc::kill(w1).unwrap();
        assert_eq!(sem::count(s).unwrap(), -1);
        assert_eq!(sem::info(s).unwrap(), (-1, 1));
        corten::integrity_check().unwrap();

        // The survivor is now the FIFO head.
        sem::signal(s).unwrap();
        assert_eq!(values_of("woke"), [2]);
        assert_eq!(proc::state_of(w2).unwrap(), ProcState::Free);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn semaphore_pool_capacity_roundtrip() {
        corten::init();
        let mut sems = Vec::new();
        for _ in 0..NSEM {
            sems.push(sem::create(0).unwrap());
        }
        assert_eq!(sem::create(0), Err(KernelError::NoFreeSem));
        sem::delete(sems[3]).unwrap();
        let again = sem::create(7).unwrap();
        assert_eq!(sem::count(again).unwrap(), 7);
        for s in sems.into_iter().filter(|s| s.0 != 3) {
            sem::delete(s).unwrap();
        }
        corten::integrity_check().unwrap();
    }

    #[test]
    fn argument_and_state_errors() {
        corten::init();
        assert_eq!(sem::create(-1), Err(KernelError::BadArgument));
        assert_eq!(sem::wait(SemId(NSEM)), Err(KernelError::BadSemId));
        assert_eq!(sem::count(SemId(0)), Err(KernelError::BadSemId));

        let s = sem::create(0).unwrap();
        // The null process may never block.
        assert_eq!(sem::wait(s), Err(KernelError::WrongState));
        assert_eq!(sem::timed_wait(s, 10), Err(KernelError::WrongState));
        assert_eq!(labels(), Vec::<&str>::new());
        corten::integrity_check().unwrap();
    }
}
