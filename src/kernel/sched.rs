/*
 * Scheduler
 *
 * resched() is the only place a scheduling decision is made. The ready
 * list is kept in descending priority order with ties in arrival order,
 * so the decision reduces to comparing the current process against the
 * list head:
 *
 * - The current process keeps the CPU only while its priority strictly
 *   exceeds the ready head's. On equality it is requeued behind its
 *   equal-priority peers, which is what lets the preemption quantum
 *   rotate CPU-bound processes of the same priority.
 * - The next owner is the dequeued head, or the null process when the
 *   list is empty.
 *
 * The kernel lock is released before ctxsw(): the incoming process
 * resumes inside whatever primitive it blocked in and re-acquires the
 * lock itself if it needs one. Interrupts stay masked across the switch;
 * the incoming register image carries its own flag state.
 */

use spin::MutexGuard;

use crate::arch::x86_64::context;
use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::proc::{Pid, ProcState};
use crate::kernel::{self, Kernel};
use crate::params::NULLPROC;

/// Mark a process READY and insert it into the ready list by priority.
/// The caller decides whether a reschedule follows.
pub(crate) fn ready_proc(k: &mut Kernel, pid: usize) {
    debug_assert!(!matches!(k.procs[pid].state, ProcState::Free));
    k.procs[pid].state = ProcState::Ready;
    let prio = i32::from(k.procs[pid].prio);
    let rq = k.ready_q;
    k.queues
        .insert(Pid(pid), rq, prio)
        .expect("ready list insert failed");
}

/// The reschedule decision. Consumes the table guard so the lock is
/// provably released before the register images are swapped.
pub(crate) fn resched(mut k: MutexGuard<'static, Kernel>) {
    let old = k.curr;
    if matches!(k.procs[old].state, ProcState::Current) {
        let stay = match k.queues.first_key(k.ready_q) {
            Some(head_key) => i32::from(k.procs[old].prio) > head_key,
            None => true,
        };
        if stay {
            return;
        }
        ready_proc(&mut k, old);
    }

    let new = {
        let kr = &mut *k;
        kr.queues
            .dequeue(kr.ready_q)
            .map(|p| p.0)
            .unwrap_or(NULLPROC)
    };
    k.procs[new].state = ProcState::Current;
    k.curr = new;
    if new == old {
        return;
    }
    k.ctx_switches += 1;

    let old_sp = &raw mut k.procs[old].saved_sp;
    let new_sp = &raw const k.procs[new].saved_sp;
    drop(k);
    // The raw pointers target the static kernel tables and the mask is
    // still held by the caller's guard, so nothing can observe the
    // half-switched state.
    unsafe { context::ctxsw(old_sp, new_sp) }
}

/// Voluntarily offer the CPU to any process of equal or higher priority.
pub fn yield_now() {
    let _g = IrqGuard::new();
    resched(kernel::lock());
}
