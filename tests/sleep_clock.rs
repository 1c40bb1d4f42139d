/*
 * Sleep queue and clock scenario tests: delta-list wake times, unsleep
 * with delta propagation, tick deferral, software timers, quantum
 * control and the boundary behaviors of the sleep calls.
 */

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{labels, record, values_of};
use corten::params::{DEFAULT_STACK, QUANTUM};
use corten::proc::{self, Pid, ProcState};
use corten::timer::{self, TimerState};
use corten::{KernelError, clock};
use rusty_fork::rusty_fork_test;

extern "C" fn sleeper(ticks: u64, id: u64) {
    record("asleep", id);
    clock::sleep(ticks as u32).unwrap();
    record("woke-id", id);
    record("woke-tick", clock::ticks());
}

extern "C" fn ms_sleeper(ms: u64, id: u64) {
    record("asleep", id);
    clock::sleep_ms(ms as u32).unwrap();
    record("woke-id", id);
    record("woke-tick", clock::ticks());
}

extern "C" fn zero_yielder(id: u64, iters: u64) {
    for _ in 0..iters {
        record("step", id);
        clock::sleep(0).unwrap();
    }
}

extern "C" fn starter(a: u64, b: u64) {
    proc::resume(Pid(a as usize)).unwrap();
    proc::resume(Pid(b as usize)).unwrap();
}

extern "C" fn ticking_spinner(iters: u64, _b: u64) {
    for _ in 0..iters {
        record("spin", 0);
        clock::tick();
    }
}

fn spawn_sleeper(ticks: u32, id: u64) -> Pid {
    let pid = proc::create(sleeper, DEFAULT_STACK, 40, "sleeper", ticks as u64, id).unwrap();
    proc::resume(pid).unwrap();
    pid
}

static FIRES_A: AtomicUsize = AtomicUsize::new(0);
static FIRES_B: AtomicUsize = AtomicUsize::new(0);

fn count_fire(arg: usize) {
    match arg {
        0 => FIRES_A.fetch_add(1, Ordering::SeqCst),
        _ => FIRES_B.fetch_add(1, Ordering::SeqCst),
    };
}

rusty_fork_test! {
    #[test]
    fn delta_list_preserves_absolute_wake_times() {
        corten::init();
        // Establish a non-zero epoch first.
        for _ in 0..100 {
            clock::tick();
        }
        let x = spawn_sleeper(50, 1); // wakes at 150
        let y = spawn_sleeper(30, 2); // wakes at 130
        let z = spawn_sleeper(70, 3); // wakes at 170
        corten::integrity_check().unwrap();

        for _ in 0..30 {
            clock::tick();
        }
        assert_eq!(values_of("woke-id"), [2]);
        assert_eq!(values_of("woke-tick"), [130]);
        assert_eq!(proc::state_of(x).unwrap(), ProcState::Sleeping);

        // Cancel x at tick 135; z's wake time must not move.
        for _ in 0..5 {
            clock::tick();
        }
        clock::unsleep(x).unwrap();
        assert_eq!(proc::state_of(x).unwrap(), ProcState::Suspended);
        corten::integrity_check().unwrap();

        for _ in 0..40 {
            clock::tick();
        }
        assert_eq!(values_of("woke-id"), [2, 3]);
        assert_eq!(values_of("woke-tick"), [130, 170]);
        assert_eq!(proc::state_of(z).unwrap(), ProcState::Free);
        proc::kill(x).unwrap();
        corten::integrity_check().unwrap();
    }

    #[test]
    fn clock_wake_preempts_mid_quantum() {
        corten::init();
        // A CPU-bound spinner drives the clock; a higher-priority sleeper
        // expires at tick 3, far from the quantum boundary at 10.
        let spin = proc::create(ticking_spinner, DEFAULT_STACK, 40, "spin", 6, 0).unwrap();
        let slp = proc::create(sleeper, DEFAULT_STACK, 50, "hi-sleeper", 3, 7).unwrap();
        let ctl = proc::create(starter, DEFAULT_STACK, 60, "starter", slp.0 as u64, spin.0 as u64)
            .unwrap();
        proc::resume(ctl).unwrap();

        // The wake cuts the spinner's quantum short: the sleeper runs
        // after the spinner's third pass, not at the quantum boundary.
        assert_eq!(values_of("woke-id"), [7]);
        assert_eq!(values_of("woke-tick"), [3]);
        let seq = labels();
        assert_eq!(
            seq[..6],
            ["asleep", "spin", "spin", "spin", "woke-id", "woke-tick"]
        );
        assert_eq!(values_of("spin").len(), 6);
        assert_eq!(clock::ticks(), 6);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn sleep_zero_behaves_as_yield() {
        corten::init();
        let a = proc::create(zero_yielder, DEFAULT_STACK, 40, "za", 1, 3).unwrap();
        let b = proc::create(zero_yielder, DEFAULT_STACK, 40, "zb", 2, 3).unwrap();
        let ctl = proc::create(starter, DEFAULT_STACK, 60, "starter", a.0 as u64, b.0 as u64)
            .unwrap();
        proc::resume(ctl).unwrap();
        assert_eq!(values_of("step"), [1, 2, 1, 2, 1, 2]);
        // Nothing ever entered the sleep list.
        assert_eq!(clock::ticks(), 0);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn sleep_ms_rounds_up_to_a_full_tick() {
        corten::init();
        let w = proc::create(ms_sleeper, DEFAULT_STACK, 40, "msw", 3, 1).unwrap();
        proc::resume(w).unwrap();
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Sleeping);
        clock::tick();
        clock::tick();
        clock::tick();
        assert_eq!(values_of("woke-tick"), [3]);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn deferred_ticks_replay_on_undefer() {
        corten::init();
        let w = spawn_sleeper(5, 1);
        clock::defer();
        for _ in 0..10 {
            clock::tick();
        }
        // Time advanced, but no clock-driven transition happened.
        assert_eq!(clock::ticks(), 10);
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Sleeping);

        clock::undefer();
        // The replay retired the sleep; the wake observed tick 10.
        assert_eq!(values_of("woke-id"), [1]);
        assert_eq!(values_of("woke-tick"), [10]);
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Free);
        corten::integrity_check().unwrap();
    }

    #[test]
    fn timers_fire_one_shot_and_periodic() {
        corten::init();
        assert_eq!(
            timer::create(count_fire, 0, 0, 0),
            Err(KernelError::BadArgument)
        );
        let one_shot = timer::create(count_fire, 0, 3, 0).unwrap();
        let periodic = timer::create(count_fire, 1, 2, 2).unwrap();

        for _ in 0..6 {
            clock::tick();
        }
        // One-shot at tick 3; periodic at ticks 2, 4 and 6.
        assert_eq!(FIRES_A.load(Ordering::SeqCst), 1);
        assert_eq!(FIRES_B.load(Ordering::SeqCst), 3);
        assert_eq!(timer::state_of(one_shot).unwrap(), TimerState::Expired);

        timer::stop(periodic).unwrap();
        for _ in 0..4 {
            clock::tick();
        }
        assert_eq!(FIRES_B.load(Ordering::SeqCst), 3);

        // Restart the one-shot with a fresh delay.
        timer::start(one_shot, 2).unwrap();
        clock::tick();
        clock::tick();
        assert_eq!(FIRES_A.load(Ordering::SeqCst), 2);

        timer::delete(one_shot).unwrap();
        assert_eq!(timer::delete(one_shot), Err(KernelError::BadTimerId));
        assert_eq!(timer::stop(one_shot), Err(KernelError::BadTimerId));
        corten::integrity_check().unwrap();
    }

    #[test]
    fn quantum_control_and_uptime_counters() {
        corten::init();
        assert_eq!(clock::quantum(), QUANTUM);
        assert_eq!(clock::set_quantum(5), QUANTUM);
        assert_eq!(clock::quantum(), 5);
        // Zero clamps to the minimum instead of disabling preemption.
        assert_eq!(clock::set_quantum(0), 5);
        assert_eq!(clock::quantum(), 1);

        // Surrendering the quantum with nothing else runnable keeps the
        // null process on the CPU.
        clock::yield_quantum();
        assert_eq!(proc::current_pid(), Pid(0));

        for _ in 0..2500 {
            clock::tick();
        }
        assert_eq!(clock::ticks(), 2500);
        assert_eq!(clock::time_secs(), 2);
        let up = clock::uptime();
        assert_eq!((up.days, up.hours, up.minutes, up.seconds), (0, 0, 0, 2));
    }

    #[test]
    fn sleep_argument_and_state_errors() {
        corten::init();
        // The null process may never sleep.
        assert_eq!(clock::sleep(5), Err(KernelError::WrongState));
        assert_eq!(clock::unsleep(Pid(3)), Err(KernelError::BadPid));

        let w = proc::create(sleeper, DEFAULT_STACK, 40, "w", 5, 1).unwrap();
        // Not sleeping yet.
        assert_eq!(clock::unsleep(w), Err(KernelError::WrongState));
        proc::resume(w).unwrap();
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Sleeping);

        // Ticks arriving before init are ignored; this one is after init
        // and retires nothing yet.
        clock::tick();
        assert_eq!(proc::state_of(w).unwrap(), ProcState::Sleeping);
        proc::kill(w).unwrap();
        corten::integrity_check().unwrap();
    }

    #[test]
    fn tick_before_init_is_ignored() {
        clock::tick();
        corten::init();
        assert_eq!(clock::ticks(), 0);
        clock::tick();
        assert_eq!(clock::ticks(), 1);
    }
}
