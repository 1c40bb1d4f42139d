/*
 * Software Timers
 *
 * A fixed table of timer records scanned by the clock tick. A record is
 * either a user timer, whose callback fires in interrupt context, or an
 * internal semaphore-timeout record armed by timed waits. Periodic
 * timers re-arm themselves relative to the tick that fired them;
 * one-shot user timers park in EXPIRED until restarted or deleted.
 *
 * User callbacks run after the table update, with the kernel tables
 * unlocked but interrupts still masked. They must not block and must
 * not force a reschedule; the tick that fired them reschedules once at
 * its own tail.
 */

use core::fmt;

use heapless::Vec;

use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::{self, Kernel, sem};
use crate::params::NTIMERS;

/// Timer identifier: an index into the timer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(pub usize);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// Callback signature for user timers. Runs at interrupt level.
pub type TimerCallback = fn(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Free,
    Active,
    Expired,
    Stopped,
}

#[derive(Clone, Copy)]
pub(crate) enum TimerAction {
    /// User timer: invoke the callback with its argument.
    Callback { cb: TimerCallback, arg: usize },
    /// Internal record: expire a timed semaphore wait.
    SemTimeout { pid: usize },
}

pub(crate) struct TimerSlot {
    pub state: TimerState,
    /// Absolute expiration tick.
    pub expires: u64,
    /// Re-arm interval in ticks; zero for one-shot.
    pub period: u32,
    pub action: Option<TimerAction>,
}

impl TimerSlot {
    pub const fn free() -> Self {
        Self {
            state: TimerState::Free,
            expires: 0,
            period: 0,
            action: None,
        }
    }
}

fn check(tid: TimerId) -> KernelResult<()> {
    if tid.0 >= NTIMERS {
        return Err(KernelError::BadTimerId);
    }
    Ok(())
}

fn find_free(k: &Kernel) -> KernelResult<usize> {
    k.timers
        .iter()
        .position(|t| t.state == TimerState::Free)
        .ok_or(KernelError::NoFreeTimer)
}

/// Allocate and start a user timer. `delay` must be at least one tick;
/// a non-zero `period` makes it re-fire on that interval.
pub fn create(cb: TimerCallback, arg: usize, delay: u32, period: u32) -> KernelResult<TimerId> {
    if delay == 0 {
        return Err(KernelError::BadArgument);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let slot = find_free(&k)?;
    let now = k.clock.ticks;
    k.timers[slot] = TimerSlot {
        state: TimerState::Active,
        expires: now + u64::from(delay),
        period,
        action: Some(TimerAction::Callback { cb, arg }),
    };
    Ok(TimerId(slot))
}

/// Reactivate a stopped or expired timer. A non-zero `delay` installs a
/// new expiration relative to now; zero keeps the recorded one.
pub fn start(tid: TimerId, delay: u32) -> KernelResult<()> {
    check(tid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if k.timers[tid.0].state == TimerState::Free {
        return Err(KernelError::BadTimerId);
    }
    if delay > 0 {
        let now = k.clock.ticks;
        k.timers[tid.0].expires = now + u64::from(delay);
    }
    k.timers[tid.0].state = TimerState::Active;
    Ok(())
}

/// Halt an active timer without freeing its slot.
pub fn stop(tid: TimerId) -> KernelResult<()> {
    check(tid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    match k.timers[tid.0].state {
        TimerState::Free => Err(KernelError::BadTimerId),
        TimerState::Active => {
            k.timers[tid.0].state = TimerState::Stopped;
            Ok(())
        }
        _ => Err(KernelError::WrongState),
    }
}

/// Return a timer slot to the free pool.
pub fn delete(tid: TimerId) -> KernelResult<()> {
    check(tid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if k.timers[tid.0].state == TimerState::Free {
        return Err(KernelError::BadTimerId);
    }
    k.timers[tid.0] = TimerSlot::free();
    Ok(())
}

pub fn state_of(tid: TimerId) -> KernelResult<TimerState> {
    check(tid)?;
    let _g = IrqGuard::new();
    Ok(kernel::lock().timers[tid.0].state)
}

/// Arm an internal one-shot covering a timed semaphore wait.
pub(crate) fn arm_sem_timeout(k: &mut Kernel, pid: usize, ticks: u32) -> KernelResult<TimerId> {
    let slot = find_free(k)?;
    let now = k.clock.ticks;
    k.timers[slot] = TimerSlot {
        state: TimerState::Active,
        expires: now + u64::from(ticks),
        period: 0,
        action: Some(TimerAction::SemTimeout { pid }),
    };
    Ok(TimerId(slot))
}

/// Drop the timeout covering `pid`'s wait, if one is armed. Called by
/// whichever waker claims the process before its deadline.
pub(crate) fn cancel_wait_timer(k: &mut Kernel, pid: usize) {
    if let Some(tid) = k.procs[pid].wait_timer.take() {
        k.timers[tid.0] = TimerSlot::free();
    }
}

/// Scan the table for due records. Semaphore timeouts are resolved in
/// place; user callbacks are collected for the caller to run once the
/// tables are unlocked. Sets `woke` if any process became runnable.
pub(crate) fn fire_due(k: &mut Kernel, woke: &mut bool) -> Vec<(TimerCallback, usize), NTIMERS> {
    let now = k.clock.ticks;
    let mut callbacks: Vec<(TimerCallback, usize), NTIMERS> = Vec::new();
    for i in 0..NTIMERS {
        if k.timers[i].state != TimerState::Active || k.timers[i].expires > now {
            continue;
        }
        let action = k.timers[i].action;
        match action {
            Some(TimerAction::Callback { cb, arg }) => {
                if k.timers[i].period > 0 {
                    let period = k.timers[i].period;
                    k.timers[i].expires = now + u64::from(period);
                } else {
                    k.timers[i].state = TimerState::Expired;
                }
                // Table is sized to hold every possible due callback.
                let _ = callbacks.push((cb, arg));
            }
            Some(TimerAction::SemTimeout { pid }) => {
                k.timers[i] = TimerSlot::free();
                if sem::timeout_waiter(k, pid) {
                    *woke = true;
                }
            }
            None => unreachable!("active timer without an action"),
        }
    }
    callbacks
}
