/*
 * Process Management
 *
 * The process table is a fixed array of PCBs indexed by pid. A PCB is
 * both the identity of a process and, through the queue pool or its
 * semaphore link field, a node in at most one kernel list at a time.
 * State is a tagged enum so the per-state payload (the semaphore a
 * waiter blocks on) cannot outlive the state that gives it meaning.
 *
 * Lifecycle: create() builds a SUSPENDED process with a fabricated first
 * activation frame on a freshly allocated stack; resume() makes it
 * runnable; kill() detaches it from whatever list holds it, returns its
 * stack and frees the slot. The null process occupies slot 0 from init
 * and never terminates.
 */

use core::fmt;

use heapless::String;

use crate::arch::x86_64::context::{self, ProcEntry};
use crate::arch::x86_64::interrupts::IrqGuard;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::msg::Msg;
use crate::kernel::sem::SemId;
use crate::kernel::timer::TimerId;
use crate::kernel::{self, Kernel, NIL, sched, sem, timer};
use crate::memory::stack_pool;
use crate::params::{MIN_STACK, NAMELEN, NPROC, NULLPROC, PRIO_MAX, PRIO_MIN, Prio};

/// Process identifier: an index into the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

/// Process state. One PCB is `Current` at any instant; list membership
/// follows the state exactly (READY on the ready list, SLEEPING on the
/// sleep delta list, WAITING on its semaphore's FIFO, everything else on
/// no list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Free,
    Current,
    Ready,
    /// Blocked in receive() until a message arrives.
    Recv,
    Sleeping,
    Suspended,
    /// Blocked on a semaphore's FIFO wait list.
    Waiting { sem: SemId },
}

impl ProcState {
    /// Numeric code used in diagnostics.
    pub fn code(&self) -> u8 {
        match self {
            ProcState::Free => 0,
            ProcState::Current => 1,
            ProcState::Ready => 2,
            ProcState::Recv => 3,
            ProcState::Sleeping => 4,
            ProcState::Suspended => 5,
            ProcState::Waiting { .. } => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcState::Free => "FREE",
            ProcState::Current => "CURR",
            ProcState::Ready => "READY",
            ProcState::Recv => "RECV",
            ProcState::Sleeping => "SLEEP",
            ProcState::Suspended => "SUSP",
            ProcState::Waiting { .. } => "WAIT",
        }
    }
}

/// Why a blocked waiter was made runnable again. Recorded by the waker
/// and read back by the blocking primitive once it runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeOutcome {
    Pending,
    Signaled,
    Deleted,
    TimedOut,
}

/// Process control block.
pub(crate) struct Pcb {
    pub state: ProcState,
    pub prio: Prio,
    pub stack_base: usize,
    pub stack_len: usize,
    /// Stack pointer anchoring the saved register image.
    pub saved_sp: u64,
    pub name: String<NAMELEN>,
    /// Single-slot message box.
    pub inbox: Option<Msg>,
    /// Next waiter on the same semaphore FIFO, or NIL.
    pub sem_link: usize,
    pub wake: WakeOutcome,
    /// Timeout armed by a timed wait, cancelled by whoever wakes us.
    pub wait_timer: Option<TimerId>,
}

impl Pcb {
    pub const fn empty() -> Self {
        Self {
            state: ProcState::Free,
            prio: PRIO_MIN,
            stack_base: 0,
            stack_len: 0,
            saved_sp: 0,
            name: String::new(),
            inbox: None,
            sem_link: NIL,
            wake: WakeOutcome::Pending,
            wait_timer: None,
        }
    }
}

fn check_pid(pid: Pid) -> KernelResult<()> {
    if pid.0 >= NPROC {
        return Err(KernelError::BadPid);
    }
    Ok(())
}

fn alloc_pid(k: &mut Kernel) -> KernelResult<usize> {
    for i in 0..NPROC {
        let pid = (k.pid_hint + i) % NPROC;
        if pid == NULLPROC {
            continue;
        }
        if matches!(k.procs[pid].state, ProcState::Free) {
            k.pid_hint = (pid + 1) % NPROC;
            return Ok(pid);
        }
    }
    Err(KernelError::NoFreeProc)
}

fn round_stack(requested: usize) -> usize {
    (requested.max(MIN_STACK) + 15) & !15
}

/// Create a new process in SUSPENDED state and return its pid. The entry
/// runs with `arg0`/`arg1` once the process is resumed and scheduled; a
/// returning entry terminates its process. Priorities outside the legal
/// range are clamped, stack sizes rounded up.
pub fn create(
    entry: ProcEntry,
    stack_size: usize,
    priority: Prio,
    name: &str,
    arg0: u64,
    arg1: u64,
) -> KernelResult<Pid> {
    let prio = priority.clamp(PRIO_MIN, PRIO_MAX);
    let ssize = round_stack(stack_size);

    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let pid = alloc_pid(&mut k)?;
    // Slot not yet claimed; a stack failure leaves the table untouched.
    let base = stack_pool::alloc_stack(ssize)?;
    let top = (base + ssize) as *mut u64;
    let sp = unsafe { context::init_stack(top, entry, arg0, arg1) };

    let pcb = &mut k.procs[pid];
    pcb.state = ProcState::Suspended;
    pcb.prio = prio;
    pcb.stack_base = base;
    pcb.stack_len = ssize;
    pcb.saved_sp = sp;
    pcb.name.clear();
    for ch in name.chars() {
        if pcb.name.push(ch).is_err() {
            break;
        }
    }
    pcb.inbox = None;
    pcb.sem_link = NIL;
    pcb.wake = WakeOutcome::Pending;
    pcb.wait_timer = None;
    drop(k);

    log::debug!("created pid {} prio {} ({})", pid, prio, name);
    Ok(Pid(pid))
}

/// Terminate a process in any state and release its resources. A WAITING
/// victim is first detached from its semaphore's FIFO and the count is
/// then raised by one, since the departed waiter had already consumed a
/// decrement. A SLEEPING victim leaves the delta list with its remaining
/// delay folded into its successor. Killing the current process hands
/// the CPU away and does not return to the caller.
pub fn kill(pid: Pid) -> KernelResult<()> {
    if pid.0 == NULLPROC {
        return Err(KernelError::WrongState);
    }
    check_pid(pid)?;

    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    match k.procs[pid.0].state {
        ProcState::Free => return Err(KernelError::BadPid),
        ProcState::Current | ProcState::Recv | ProcState::Suspended => {}
        ProcState::Ready => {
            let kr = &mut *k;
            kr.queues
                .remove(pid, kr.ready_q)
                .expect("READY process missing from ready list");
        }
        ProcState::Sleeping => {
            let kr = &mut *k;
            kr.queues
                .remove_delta(pid, kr.sleep_q)
                .expect("SLEEP process missing from sleep list");
        }
        ProcState::Waiting { sem: sid } => {
            if !sem::detach_waiter(&mut k, sid, pid.0) {
                panic!("WAITING process missing from semaphore wait list");
            }
            k.sems[sid.0].count += 1;
        }
    }
    timer::cancel_wait_timer(&mut k, pid.0);

    let base = k.procs[pid.0].stack_base;
    let len = k.procs[pid.0].stack_len;
    stack_pool::free_stack(base, len);
    k.procs[pid.0] = Pcb::empty();

    if pid.0 == k.curr {
        sched::resched(k);
    } else {
        drop(k);
        log::debug!("killed pid {}", pid.0);
    }
    Ok(())
}

/// Terminate the calling process. Never returns.
pub fn exit(code: i32) -> ! {
    let pid = current_pid();
    log::debug!("pid {} exiting with code {}", pid.0, code);
    let _ = kill(pid);
    unreachable!("terminated process was scheduled again")
}

/// Move a SUSPENDED process to READY and reschedule. Returns the
/// priority the process resumed at.
pub fn resume(pid: Pid) -> KernelResult<Prio> {
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    match k.procs[pid.0].state {
        ProcState::Free => return Err(KernelError::BadPid),
        ProcState::Suspended => {}
        _ => return Err(KernelError::WrongState),
    }
    let prio = k.procs[pid.0].prio;
    sched::ready_proc(&mut k, pid.0);
    sched::resched(k);
    Ok(prio)
}

/// Move a READY or CURRENT process to SUSPENDED. Suspending the current
/// process gives up the CPU; the call completes when somebody resumes
/// it. Returns the priority at suspension time.
pub fn suspend(pid: Pid) -> KernelResult<Prio> {
    if pid.0 == NULLPROC {
        return Err(KernelError::WrongState);
    }
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    let prio = k.procs[pid.0].prio;
    match k.procs[pid.0].state {
        ProcState::Ready => {
            let kr = &mut *k;
            kr.queues
                .remove(pid, kr.ready_q)
                .expect("READY process missing from ready list");
            kr.procs[pid.0].state = ProcState::Suspended;
        }
        ProcState::Current => {
            k.procs[pid.0].state = ProcState::Suspended;
            sched::resched(k);
        }
        _ => return Err(KernelError::WrongState),
    }
    Ok(prio)
}

/// Change a process's priority, honoring immediate preemption. The new
/// priority must already be in range; nothing is clamped here. Returns
/// the old priority.
pub fn change_priority(pid: Pid, new: Prio) -> KernelResult<Prio> {
    if !(PRIO_MIN..=PRIO_MAX).contains(&new) {
        return Err(KernelError::BadArgument);
    }
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let mut k = kernel::lock();
    if matches!(k.procs[pid.0].state, ProcState::Free) {
        return Err(KernelError::BadPid);
    }
    let old = k.procs[pid.0].prio;
    k.procs[pid.0].prio = new;
    let was_ready = matches!(k.procs[pid.0].state, ProcState::Ready);
    if was_ready {
        let kr = &mut *k;
        kr.queues
            .remove(pid, kr.ready_q)
            .expect("READY process missing from ready list");
        kr.queues
            .insert(pid, kr.ready_q, i32::from(new))
            .expect("ready list insert failed");
    }
    if pid.0 == k.curr || was_ready {
        sched::resched(k);
    }
    Ok(old)
}

/// Pid of the process owning the CPU.
pub fn current_pid() -> Pid {
    let _g = IrqGuard::new();
    Pid(kernel::lock().curr)
}

/// State of any table slot, FREE included.
pub fn state_of(pid: Pid) -> KernelResult<ProcState> {
    check_pid(pid)?;
    let _g = IrqGuard::new();
    Ok(kernel::lock().procs[pid.0].state)
}

/// Priority of a live process.
pub fn priority_of(pid: Pid) -> KernelResult<Prio> {
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let k = kernel::lock();
    if matches!(k.procs[pid.0].state, ProcState::Free) {
        return Err(KernelError::BadPid);
    }
    Ok(k.procs[pid.0].prio)
}

/// Name of a live process.
pub fn name_of(pid: Pid) -> KernelResult<String<NAMELEN>> {
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let k = kernel::lock();
    if matches!(k.procs[pid.0].state, ProcState::Free) {
        return Err(KernelError::BadPid);
    }
    Ok(k.procs[pid.0].name.clone())
}

/// Number of non-free table entries, the null process included.
pub fn process_count() -> usize {
    let _g = IrqGuard::new();
    kernel::lock()
        .procs
        .iter()
        .filter(|p| !matches!(p.state, ProcState::Free))
        .count()
}

/// Snapshot of one live process for diagnostics.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub pid: Pid,
    pub state: ProcState,
    pub prio: Prio,
    pub name: String<NAMELEN>,
    pub stack_len: usize,
}

pub fn info(pid: Pid) -> KernelResult<ProcInfo> {
    check_pid(pid)?;
    let _g = IrqGuard::new();
    let k = kernel::lock();
    let pcb = &k.procs[pid.0];
    if matches!(pcb.state, ProcState::Free) {
        return Err(KernelError::BadPid);
    }
    Ok(ProcInfo {
        pid,
        state: pcb.state,
        prio: pcb.prio,
        name: pcb.name.clone(),
        stack_len: pcb.stack_len,
    })
}
