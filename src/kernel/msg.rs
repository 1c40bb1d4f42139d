/*
 * Message Rendezvous
 *
 * Every PCB carries a single-slot inbox holding one machine word. send()
 * fails rather than overwrite: a second message before the first is
 * consumed is the sender's problem. receive() blocks in RECV until the
 * slot fills; a RECV process sits on no kernel list and is readied
 * directly by the sender.
 *
 * The timed receive is a bounded-step poll: probe, sleep a short
 * interval, repeat until the budget runs out.
 */

use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::proc::{Pid, ProcState};
use crate::kernel::{self, clock, sched};
use crate::params::{NPROC, NULLPROC};

/// One machine word of message payload.
pub type Msg = u64;

/// Longest single sleep inside recv_timeout(), in milliseconds.
const POLL_STEP_MS: u32 = 10;

/// Deliver one word to `pid`. Fails if the target does not exist or its
/// slot is occupied. A target blocked in receive() is readied and may
/// preempt the caller immediately.
pub fn send(pid: Pid, msg: Msg) -> KernelResult<()> {
    if pid.0 >= NPROC {
        return Err(KernelError::BadPid);
    }
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if matches!(k.procs[pid.0].state, ProcState::Free) {
        return Err(KernelError::BadPid);
    }
    if k.procs[pid.0].inbox.is_some() {
        return Err(KernelError::MessagePending);
    }
    k.procs[pid.0].inbox = Some(msg);
    if matches!(k.procs[pid.0].state, ProcState::Recv) {
        sched::ready_proc(&mut k, pid.0);
        sched::resched(k);
    }
    Ok(())
}

/// Block until a message arrives, then consume it.
pub fn receive() -> KernelResult<Msg> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if k.curr == NULLPROC {
        return Err(KernelError::WrongState);
    }
    loop {
        let me = k.curr;
        if let Some(msg) = k.procs[me].inbox.take() {
            return Ok(msg);
        }
        k.procs[me].state = ProcState::Recv;
        sched::resched(k);
        k = kernel::lock();
    }
}

/// Consume a pending message without blocking.
pub fn recv_clear() -> Option<Msg> {
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let me = k.curr;
    k.procs[me].inbox.take()
}

/// Consume a message, waiting at most `ms` milliseconds. Polls the slot
/// on a bounded step so a message arriving mid-wait is picked up within
/// one step.
pub fn recv_timeout(ms: u32) -> KernelResult<Msg> {
    {
        let _g = IrqGuard::new();
        let mut k = kernel::lock();
        if k.curr == NULLPROC {
            return Err(KernelError::WrongState);
        }
        let me = k.curr;
        if let Some(msg) = k.procs[me].inbox.take() {
            return Ok(msg);
        }
    }
    if ms == 0 {
        return Err(KernelError::Timeout);
    }
    let mut waited = 0u32;
    loop {
        let step = POLL_STEP_MS.min(ms - waited);
        clock::sleep_ms(step)?;
        waited += step;
        {
            let _g = IrqGuard::new();
            let mut k = kernel::lock();
            let me = k.curr;
            if let Some(msg) = k.procs[me].inbox.take() {
                return Ok(msg);
            }
        }
        if waited >= ms {
            return Err(KernelError::Timeout);
        }
    }
}
