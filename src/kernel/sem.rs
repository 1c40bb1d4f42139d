/*
 * Counting Semaphores
 *
 * Each semaphore is a signed count plus a FIFO of waiting processes
 * chained through the PCB `sem_link` field. A negative count of -n means
 * exactly n processes are parked on the list in arrival order; a count
 * of zero or more means the list is empty. Free table slots are chained
 * through a dedicated `next_free` field.
 *
 * Wakeups never re-probe the semaphore slot: the waker records why the
 * waiter is being released (signaled, deleted, timed out) in the PCB and
 * the blocking call reports that outcome once it runs again. A slot can
 * therefore be freed and recycled while former waiters are still
 * draining out, without misattribution.
 */

use core::fmt;

use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::proc::{ProcState, WakeOutcome};
use crate::kernel::{self, Kernel, NIL, clock, sched, timer};
use crate::params::{NSEM, NULLPROC};

/// Semaphore identifier: an index into the semaphore table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemId(pub usize);

impl fmt::Display for SemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sem({})", self.0)
    }
}

/// Semaphore table entry.
pub(crate) struct SemEntry {
    pub allocated: bool,
    pub count: i32,
    /// First waiter (next to wake), or NIL.
    pub head: usize,
    /// Last waiter (most recent arrival), or NIL.
    pub tail: usize,
    /// Free-list link while unallocated.
    pub next_free: usize,
}

impl SemEntry {
    pub const fn free() -> Self {
        Self {
            allocated: false,
            count: 0,
            head: NIL,
            tail: NIL,
            next_free: NIL,
        }
    }
}

fn check(k: &Kernel, sid: SemId) -> KernelResult<()> {
    if sid.0 >= NSEM || !k.sems[sid.0].allocated {
        return Err(KernelError::BadSemId);
    }
    Ok(())
}

fn fifo_push(k: &mut Kernel, s: usize, pid: usize) {
    k.procs[pid].sem_link = NIL;
    if k.sems[s].tail == NIL {
        k.sems[s].head = pid;
    } else {
        let tail = k.sems[s].tail;
        k.procs[tail].sem_link = pid;
    }
    k.sems[s].tail = pid;
}

fn fifo_pop(k: &mut Kernel, s: usize) -> Option<usize> {
    let pid = k.sems[s].head;
    if pid == NIL {
        return None;
    }
    k.sems[s].head = k.procs[pid].sem_link;
    if k.sems[s].head == NIL {
        k.sems[s].tail = NIL;
    }
    k.procs[pid].sem_link = NIL;
    Some(pid)
}

fn fifo_len(k: &Kernel, s: usize) -> usize {
    let mut count = 0;
    let mut pid = k.sems[s].head;
    while pid != NIL {
        count += 1;
        pid = k.procs[pid].sem_link;
    }
    count
}

/// Unlink a specific waiter, wherever it sits in the FIFO. Used by kill
/// and by the wait timeout. Returns whether the pid was found.
pub(crate) fn detach_waiter(k: &mut Kernel, sid: SemId, pid: usize) -> bool {
    let s = sid.0;
    let mut prev = NIL;
    let mut curr = k.sems[s].head;
    while curr != NIL {
        if curr == pid {
            let next = k.procs[curr].sem_link;
            if prev == NIL {
                k.sems[s].head = next;
            } else {
                k.procs[prev].sem_link = next;
            }
            if k.sems[s].tail == pid {
                k.sems[s].tail = prev;
            }
            k.procs[pid].sem_link = NIL;
            return true;
        }
        prev = curr;
        curr = k.procs[curr].sem_link;
    }
    false
}

/// Expire a timed wait: detach the waiter from its semaphore, compensate
/// the count for the decrement its wait() performed, and ready it with a
/// timed-out outcome. Runs from the clock tick with the tables locked.
/// Returns whether a process was made runnable.
pub(crate) fn timeout_waiter(k: &mut Kernel, pid: usize) -> bool {
    if let ProcState::Waiting { sem } = k.procs[pid].state {
        if detach_waiter(k, sem, pid) {
            k.sems[sem.0].count += 1;
            k.procs[pid].wake = WakeOutcome::TimedOut;
            k.procs[pid].wait_timer = None;
            sched::ready_proc(k, pid);
            return true;
        }
    }
    false
}

/// Read back why the caller was released and translate it to a result.
fn finish_wait(me: usize) -> KernelResult<()> {
    let k = kernel::lock();
    match k.procs[me].wake {
        WakeOutcome::Signaled => Ok(()),
        WakeOutcome::Deleted => Err(KernelError::Deleted),
        WakeOutcome::TimedOut => Err(KernelError::Timeout),
        WakeOutcome::Pending => unreachable!("waiter resumed without a wake outcome"),
    }
}

/// Allocate a semaphore with the given non-negative initial count.
pub fn create(initial: i32) -> KernelResult<SemId> {
    if initial < 0 {
        return Err(KernelError::BadArgument);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let s = k.sem_free;
    if s == NIL {
        return Err(KernelError::NoFreeSem);
    }
    k.sem_free = k.sems[s].next_free;
    k.sems[s] = SemEntry {
        allocated: true,
        count: initial,
        head: NIL,
        tail: NIL,
        next_free: NIL,
    };
    drop(k);
    log::debug!("created semaphore {} count {}", s, initial);
    Ok(SemId(s))
}

/// Decrement the count, blocking FIFO while it is negative. Reports
/// `Deleted` when the semaphore is torn down mid-wait.
pub fn wait(sid: SemId) -> KernelResult<()> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    if k.curr == NULLPROC {
        return Err(KernelError::WrongState);
    }
    k.sems[sid.0].count -= 1;
    if k.sems[sid.0].count >= 0 {
        return Ok(());
    }
    let me = k.curr;
    k.procs[me].wake = WakeOutcome::Pending;
    k.procs[me].state = ProcState::Waiting { sem: sid };
    fifo_push(&mut k, sid.0, me);
    sched::resched(k);
    finish_wait(me)
}

/// Decrement only if it would not block.
pub fn try_wait(sid: SemId) -> KernelResult<()> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    if k.sems[sid.0].count > 0 {
        k.sems[sid.0].count -= 1;
        Ok(())
    } else {
        Err(KernelError::WouldBlock)
    }
}

/// wait() racing a timeout. The waiter sits on the semaphore FIFO while
/// an armed timer table entry covers the deadline; whichever side fires
/// first detaches the process from the other under the same mask.
pub fn timed_wait(sid: SemId, ms: u32) -> KernelResult<()> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    if k.curr == NULLPROC {
        return Err(KernelError::WrongState);
    }
    if k.sems[sid.0].count > 0 {
        k.sems[sid.0].count -= 1;
        return Ok(());
    }
    if ms == 0 {
        return Err(KernelError::Timeout);
    }
    let me = k.curr;
    let ticks = clock::ms_to_ticks_ceil(ms);
    let tid = timer::arm_sem_timeout(&mut k, me, ticks)?;
    k.sems[sid.0].count -= 1;
    k.procs[me].wake = WakeOutcome::Pending;
    k.procs[me].state = ProcState::Waiting { sem: sid };
    k.procs[me].wait_timer = Some(tid);
    fifo_push(&mut k, sid.0, me);
    sched::resched(k);
    finish_wait(me)
}

/// Increment the count and release the longest waiter, if any. The woken
/// process may outrank the caller, so a reschedule follows the wake.
pub fn signal(sid: SemId) -> KernelResult<()> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    k.sems[sid.0].count += 1;
    if k.sems[sid.0].count <= 0 {
        let pid = fifo_pop(&mut k, sid.0).expect("negative count with empty wait list");
        timer::cancel_wait_timer(&mut k, pid);
        k.procs[pid].wake = WakeOutcome::Signaled;
        sched::ready_proc(&mut k, pid);
        sched::resched(k);
    }
    Ok(())
}

/// Equivalent to `n` signals with a single trailing reschedule.
pub fn signal_n(sid: SemId, n: i32) -> KernelResult<()> {
    if n <= 0 {
        return Err(KernelError::BadArgument);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    for _ in 0..n {
        k.sems[sid.0].count += 1;
        if k.sems[sid.0].count <= 0 {
            let pid = fifo_pop(&mut k, sid.0).expect("negative count with empty wait list");
            timer::cancel_wait_timer(&mut k, pid);
            k.procs[pid].wake = WakeOutcome::Signaled;
            sched::ready_proc(&mut k, pid);
        }
    }
    sched::resched(k);
    Ok(())
}

fn release_all(k: &mut Kernel, s: usize) {
    while let Some(pid) = fifo_pop(k, s) {
        timer::cancel_wait_timer(k, pid);
        k.procs[pid].wake = WakeOutcome::Deleted;
        sched::ready_proc(k, pid);
    }
}

/// Tear the semaphore down. Every waiter is released with a `Deleted`
/// outcome and the slot returns to the free list.
pub fn delete(sid: SemId) -> KernelResult<()> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    release_all(&mut k, sid.0);
    let next = k.sem_free;
    k.sems[sid.0] = SemEntry {
        next_free: next,
        ..SemEntry::free()
    };
    k.sem_free = sid.0;
    sched::resched(k);
    Ok(())
}

/// delete() that reinstalls a fresh count instead of freeing the slot.
/// Pending waiters are released with a `Deleted` outcome.
pub fn reset(sid: SemId, count: i32) -> KernelResult<()> {
    if count < 0 {
        return Err(KernelError::BadArgument);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    check(&k, sid)?;
    release_all(&mut k, sid.0);
    k.sems[sid.0].count = count;
    sched::resched(k);
    Ok(())
}

/// Current count. Negative values report the number of waiters.
pub fn count(sid: SemId) -> KernelResult<i32> {
    let _g = IrqGuard::new();
    let k = kernel::lock();
    check(&k, sid)?;
    Ok(k.sems[sid.0].count)
}

/// Count and number of parked waiters.
pub fn info(sid: SemId) -> KernelResult<(i32, usize)> {
    let _g = IrqGuard::new();
    let k = kernel::lock();
    check(&k, sid)?;
    Ok((k.sems[sid.0].count, fifo_len(&k, sid.0)))
}
