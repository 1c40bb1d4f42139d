/*
 * Kernel Core
 *
 * The CORTEN core is one tightly coupled state machine: a fixed process
 * table whose entries migrate between the ready list, the sleep delta
 * list, per-semaphore wait lists and the message rendezvous. All of that
 * state lives in a single `Kernel` value behind one spin mutex.
 *
 * The mutex never contends at runtime: the machine is uniprocessor and
 * every holder masks interrupts first. Its job is to hand out `&mut`
 * access to the shared tables safely. The one rule that keeps the design
 * sound is that the lock is always released before a context switch;
 * whatever code the incoming process resumes in re-acquires it fresh.
 *
 * Submodules:
 * - error:  crate-wide error enum
 * - queue:  intrusive queue pool (ready list, sleep delta list)
 * - proc:   process table and lifecycle
 * - sched:  reschedule decision and switch hand-off
 * - sem:    counting semaphores
 * - clock:  tick handler, sleep queue, preemption, deferral
 * - timer:  software timer table
 * - msg:    single-slot message rendezvous
 */

pub mod clock;
pub mod error;
pub mod msg;
pub mod proc;
pub mod queue;
pub mod sched;
pub mod sem;
pub mod timer;

use spin::{Mutex, MutexGuard};

use crate::arch::x86_64::interrupts::IrqGuard;
use crate::params::{CLKFREQ, NPROC, NSEM, NTIMERS, NULLPROC, PRIO_MIN};

use self::proc::{Pcb, ProcState};
use self::queue::{Qid, QueuePool};
use self::sem::SemEntry;
use self::timer::TimerSlot;

/// Null link marker for index-chained lists.
pub(crate) const NIL: usize = usize::MAX;

/// The entire shared state of the kernel.
pub(crate) struct Kernel {
    pub queues: QueuePool,
    pub procs: [Pcb; NPROC],
    pub sems: [SemEntry; NSEM],
    pub timers: [TimerSlot; NTIMERS],
    pub clock: clock::ClockState,
    /// Priority-ordered list of runnable processes, current excluded.
    pub ready_q: Qid,
    /// Delta list of sleeping processes.
    pub sleep_q: Qid,
    /// Pid of the process owning the CPU.
    pub curr: usize,
    /// Rotating start point for pid allocation.
    pub pid_hint: usize,
    /// Head of the semaphore free list, chained through `next_free`.
    pub sem_free: usize,
    pub ctx_switches: u64,
    pub online: bool,
}

impl Kernel {
    const fn new() -> Self {
        Self {
            queues: QueuePool::new(),
            procs: [const { Pcb::empty() }; NPROC],
            sems: [const { SemEntry::free() }; NSEM],
            timers: [const { TimerSlot::free() }; NTIMERS],
            clock: clock::ClockState::new(),
            ready_q: 0,
            sleep_q: 0,
            curr: NULLPROC,
            pid_hint: 1,
            sem_free: NIL,
            ctx_switches: 0,
            online: false,
        }
    }
}

static KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());

/// Acquire the kernel tables. Callers mask interrupts first.
pub(crate) fn lock() -> MutexGuard<'static, Kernel> {
    KERNEL.lock()
}

/// Bring the core online. The calling context becomes the null process:
/// pid 0, lowest priority, always READY or CURRENT, never terminated.
///
/// Must run before any other kernel operation. Repeated calls are ignored.
pub fn init() {
    let _g = IrqGuard::new();
    let mut k = lock();
    if k.online {
        drop(k);
        log::warn!("kernel init called twice, ignoring");
        return;
    }

    k.queues.init();
    k.ready_q = k.queues.new_queue().expect("ready list allocation");
    k.sleep_q = k.queues.new_queue().expect("sleep list allocation");

    for i in 0..NSEM {
        k.sems[i] = SemEntry::free();
        k.sems[i].next_free = if i + 1 < NSEM { i + 1 } else { NIL };
    }
    k.sem_free = 0;

    for slot in k.timers.iter_mut() {
        *slot = TimerSlot::free();
    }

    for pcb in k.procs.iter_mut() {
        *pcb = Pcb::empty();
    }
    let null = &mut k.procs[NULLPROC];
    null.state = ProcState::Current;
    null.prio = PRIO_MIN;
    let _ = null.name.push_str("null");

    k.curr = NULLPROC;
    k.pid_hint = 1;
    k.clock = clock::ClockState::new();
    k.ctx_switches = 0;
    k.online = true;
    drop(k);

    crate::memory::stack_pool::init();

    log::info!(
        "kernel online: {} process slots, {} semaphores, {} Hz clock",
        NPROC,
        NSEM,
        CLKFREQ
    );
}

/// Whether `init` has completed.
pub fn is_initialized() -> bool {
    let _g = IrqGuard::new();
    lock().online
}

/// Number of context switches performed since init.
pub fn context_switches() -> u64 {
    let _g = IrqGuard::new();
    lock().ctx_switches
}

/// Validate the cross-table invariants the scheduler depends on. Returns
/// the first violated condition by name. Cheap enough for test oracles
/// and debug builds; not called on any hot path.
pub fn integrity_check() -> Result<(), &'static str> {
    let _g = IrqGuard::new();
    let k = lock();
    if !k.online {
        return Err("kernel not initialized");
    }
    let kr = &*k;

    let currents = kr
        .procs
        .iter()
        .filter(|p| matches!(p.state, ProcState::Current))
        .count();
    if currents != 1 {
        return Err("exactly one process must be CURRENT");
    }
    if !matches!(kr.procs[kr.curr].state, ProcState::Current) {
        return Err("current pid does not name the CURRENT process");
    }

    // Membership count per pid across every kernel list.
    let mut seen = [0usize; NPROC];

    let mut ready_members = 0;
    let mut ready_sorted = true;
    let mut ready_consistent = true;
    let mut prev_key = i32::MAX;
    kr.queues.for_each(kr.ready_q, |pid, key| {
        seen[pid] += 1;
        ready_members += 1;
        if key > prev_key {
            ready_sorted = false;
        }
        prev_key = key;
        if !matches!(kr.procs[pid].state, ProcState::Ready)
            || i32::from(kr.procs[pid].prio) != key
        {
            ready_consistent = false;
        }
    });
    if !ready_sorted {
        return Err("ready list keys must be non-increasing");
    }
    if !ready_consistent {
        return Err("ready list entry disagrees with its PCB");
    }
    let ready_states = kr
        .procs
        .iter()
        .filter(|p| matches!(p.state, ProcState::Ready))
        .count();
    if ready_members != ready_states {
        return Err("READY process count does not match ready list");
    }

    let mut sleep_members = 0;
    let mut sleep_consistent = true;
    kr.queues.for_each(kr.sleep_q, |pid, key| {
        seen[pid] += 1;
        sleep_members += 1;
        if !matches!(kr.procs[pid].state, ProcState::Sleeping) || key < 0 {
            sleep_consistent = false;
        }
    });
    if !sleep_consistent {
        return Err("sleep list entry disagrees with its PCB");
    }
    let sleep_states = kr
        .procs
        .iter()
        .filter(|p| matches!(p.state, ProcState::Sleeping))
        .count();
    if sleep_members != sleep_states {
        return Err("SLEEP process count does not match sleep list");
    }

    for (sid, entry) in kr.sems.iter().enumerate() {
        if !entry.allocated {
            continue;
        }
        let mut waiters = 0;
        let mut pid = entry.head;
        while pid != NIL {
            if waiters > NPROC {
                return Err("semaphore wait list contains a cycle");
            }
            seen[pid] += 1;
            waiters += 1;
            match kr.procs[pid].state {
                ProcState::Waiting { sem } if sem.0 == sid => {}
                _ => return Err("semaphore waiter is not WAITING on it"),
            }
            pid = kr.procs[pid].sem_link;
        }
        let expected = if entry.count < 0 { (-entry.count) as usize } else { 0 };
        if waiters != expected {
            return Err("semaphore count disagrees with its waiter list");
        }
    }
    let wait_states = kr
        .procs
        .iter()
        .filter(|p| matches!(p.state, ProcState::Waiting { .. }))
        .count();
    let wait_members: usize = seen.iter().sum::<usize>() - ready_members - sleep_members;
    if wait_states != wait_members {
        return Err("WAITING process count does not match wait lists");
    }

    for (pid, count) in seen.iter().enumerate() {
        if *count > 1 {
            return Err("process linked on more than one kernel list");
        }
        let listed = *count == 1;
        let should_be_listed = matches!(
            kr.procs[pid].state,
            ProcState::Ready | ProcState::Sleeping | ProcState::Waiting { .. }
        );
        if listed != should_be_listed {
            return Err("process list membership disagrees with its state");
        }
    }

    Ok(())
}

/// Log one line per live process table entry.
pub fn dump_processes() {
    let _g = IrqGuard::new();
    let k = lock();
    for (pid, pcb) in k.procs.iter().enumerate() {
        if matches!(pcb.state, ProcState::Free) {
            continue;
        }
        log::info!(
            "pid {:2}  {:5}  prio {:3}  stack {:5}  {}",
            pid,
            pcb.state.label(),
            pcb.prio,
            pcb.stack_len,
            pcb.name.as_str()
        );
    }
}
