/*
 * Clock Core
 *
 * An external tick source calls tick() at CLKFREQ Hz with interrupts
 * already masked. Each tick advances the time counters and then, unless
 * deferred, performs the clock work: fire due software timers, age the
 * sleep delta list, and charge the preemption quantum. If any of that
 * made a process runnable, or the quantum ran out, the tick ends with
 * exactly one reschedule.
 *
 * Deferral is the escape hatch for structurally sensitive windows: while
 * the defer flag is set, ticks only advance the counters and accumulate.
 * undefer() replays the accumulated ticks' worth of timer and sleep work
 * and reschedules once, so monotonic time is never lost.
 *
 * Sleeping is a single global delta list: each entry's key is the wait
 * beyond the cumulative delay of all earlier entries, so the tick only
 * ever decrements the head.
 */

use spin::MutexGuard;

use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::proc::{Pid, ProcState};
use crate::kernel::{self, Kernel, sched, timer};
use crate::params::{MAX_SLEEP, MS_PER_TICK, NPROC, NULLPROC, QUANTUM};

/// Uptime broken into calendar-ish units, advanced on second rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uptime {
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl Uptime {
    pub const ZERO: Uptime = Uptime {
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };
}

/// Clock-owned counters and policy state.
pub(crate) struct ClockState {
    /// Total ticks since init. Monotonic, advances on every tick even
    /// while deferred.
    pub ticks: u64,
    /// Milliseconds accumulated toward the next second rollover.
    pub ms_in_sec: u32,
    /// Whole seconds since init.
    pub secs: u64,
    pub uptime: Uptime,
    pub defer_active: bool,
    /// Ticks whose clock work is owed to undefer().
    pub deferred: u32,
    /// Ticks left in the current quantum.
    pub preempt: i32,
    pub quantum: u32,
}

impl ClockState {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            ms_in_sec: 0,
            secs: 0,
            uptime: Uptime::ZERO,
            defer_active: false,
            deferred: 0,
            preempt: QUANTUM as i32,
            quantum: QUANTUM,
        }
    }
}

fn advance(c: &mut ClockState) {
    c.ticks += 1;
    c.ms_in_sec += MS_PER_TICK;
    if c.ms_in_sec >= 1000 {
        c.ms_in_sec -= 1000;
        c.secs += 1;
        c.uptime.seconds += 1;
        if c.uptime.seconds >= 60 {
            c.uptime.seconds = 0;
            c.uptime.minutes += 1;
            if c.uptime.minutes >= 60 {
                c.uptime.minutes = 0;
                c.uptime.hours += 1;
                if c.uptime.hours >= 24 {
                    c.uptime.hours = 0;
                    c.uptime.days += 1;
                }
            }
        }
    }
}

/// Fire due timers, releasing the table lock around user callbacks. The
/// callbacks run in interrupt context with the mask still held; they
/// must not block.
fn run_timers(
    mut k: MutexGuard<'static, Kernel>,
    woke: &mut bool,
) -> MutexGuard<'static, Kernel> {
    let callbacks = timer::fire_due(&mut k, woke);
    if !callbacks.is_empty() {
        drop(k);
        for (cb, arg) in &callbacks {
            cb(*arg);
        }
        k = kernel::lock();
    }
    k
}

/// Age the sleep list by one tick and ready everything that expired.
fn age_sleepers(k: &mut Kernel) -> bool {
    let mut woke = false;
    let sq = k.sleep_q;
    if k.queues.dec_first_key(sq).is_none() {
        return false;
    }
    while matches!(k.queues.first_key(sq), Some(key) if key <= 0) {
        let pid = k.queues.dequeue(sq).expect("sleep list head vanished");
        debug_assert!(matches!(k.procs[pid.0].state, ProcState::Sleeping));
        sched::ready_proc(k, pid.0);
        woke = true;
    }
    woke
}

/// The clock tick handler. Called by the external tick source at CLKFREQ
/// Hz, or by a test harness standing in for it.
pub fn tick() {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if !k.online {
        return;
    }
    advance(&mut k.clock);
    if k.clock.defer_active {
        k.clock.deferred += 1;
        return;
    }

    let mut woke = false;
    k = run_timers(k, &mut woke);
    woke |= age_sleepers(&mut k);

    k.clock.preempt -= 1;
    let quantum_expired = k.clock.preempt <= 0;
    if quantum_expired {
        k.clock.preempt = k.clock.quantum as i32;
    }
    if woke || quantum_expired {
        sched::resched(k);
    }
}

/// Suppress clock-driven transitions. Counters keep advancing; timer and
/// sleep work accumulates until undefer().
pub fn defer() {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    k.clock.defer_active = true;
}

/// Replay the clock work owed for every tick that arrived while deferred,
/// then reschedule once.
pub fn undefer() {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if !k.clock.defer_active {
        return;
    }
    k.clock.defer_active = false;
    let owed = core::mem::take(&mut k.clock.deferred);
    if owed == 0 {
        return;
    }
    let mut woke = false;
    for _ in 0..owed {
        k = run_timers(k, &mut woke);
        woke |= age_sleepers(&mut k);
    }
    let _ = woke;
    sched::resched(k);
}

/// Sleep for a number of ticks. Zero ticks is a plain yield.
pub fn sleep(ticks: u32) -> KernelResult<()> {
    if ticks == 0 {
        sched::yield_now();
        return Ok(());
    }
    if ticks > MAX_SLEEP {
        return Err(KernelError::BadArgument);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if k.curr == NULLPROC {
        return Err(KernelError::WrongState);
    }
    let me = k.curr;
    {
        let kr = &mut *k;
        kr.queues.insert_delta(Pid(me), kr.sleep_q, ticks as i32)?;
    }
    k.procs[me].state = ProcState::Sleeping;
    sched::resched(k);
    Ok(())
}

/// Sleep for a duration in milliseconds, rounded up to at least one tick.
pub fn sleep_ms(ms: u32) -> KernelResult<()> {
    let mut ticks = ms / MS_PER_TICK;
    if ticks == 0 && ms > 0 {
        ticks = 1;
    }
    sleep(ticks)
}

/// Cancel a sleep without readying the process: it parks SUSPENDED and
/// the caller decides whether to resume it. The removed entry's delta
/// folds into its successor, so later wake times are unaffected.
pub fn unsleep(pid: Pid) -> KernelResult<()> {
    if pid.0 >= NPROC {
        return Err(KernelError::BadPid);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    match k.procs[pid.0].state {
        ProcState::Free => return Err(KernelError::BadPid),
        ProcState::Sleeping => {}
        _ => return Err(KernelError::WrongState),
    }
    {
        let kr = &mut *k;
        kr.queues
            .remove_delta(pid, kr.sleep_q)
            .expect("SLEEP process missing from sleep list");
    }
    k.procs[pid.0].state = ProcState::Suspended;
    Ok(())
}

/// Total ticks since init.
pub fn ticks() -> u64 {
    let _g = IrqGuard::new();
    kernel::lock().clock.ticks
}

/// Whole seconds since init.
pub fn time_secs() -> u64 {
    let _g = IrqGuard::new();
    kernel::lock().clock.secs
}

/// Uptime breakdown.
pub fn uptime() -> Uptime {
    let _g = IrqGuard::new();
    kernel::lock().clock.uptime
}

/// Install a new preemption quantum (minimum one tick) and return the
/// previous one. Takes effect at the next reload.
pub fn set_quantum(ticks: u32) -> u32 {
    let ticks = ticks.max(1);
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let old = k.clock.quantum;
    k.clock.quantum = ticks;
    old
}

pub fn quantum() -> u32 {
    let _g = IrqGuard::new();
    kernel::lock().clock.quantum
}

/// Surrender the rest of the current quantum and reschedule now.
pub fn yield_quantum() {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    k.clock.preempt = 0;
    sched::resched(k);
}

pub fn ticks_to_ms(ticks: u64) -> u64 {
    ticks * u64::from(MS_PER_TICK)
}

pub fn ms_to_ticks(ms: u32) -> u32 {
    ms / MS_PER_TICK
}

/// Millisecond conversion rounding up, never less than one tick. Used
/// for deadlines.
pub(crate) fn ms_to_ticks_ceil(ms: u32) -> u32 {
    ms.div_ceil(MS_PER_TICK).max(1)
}
