/*
 * Context Switch and First Activation
 *
 * A process's register image is its callee-saved registers plus RFLAGS,
 * pushed on its own stack; the PCB stores only the resulting stack
 * pointer. ctxsw() pushes the image of the outgoing process, saves its
 * stack pointer through `old_sp`, loads the stack pointer from `new_sp`
 * and pops the incoming image. Caller-saved registers need no treatment:
 * ctxsw is an ordinary extern "C" call site from the reschedule path.
 *
 * A newly created process has never pushed an image, so create() fabricates
 * one: a frame whose return address is the launch trampoline, followed by
 * the entry function pointer and its two arguments. The first ctxsw into
 * that frame "returns" into launch, which unmasks interrupts, calls the
 * entry, and terminates the process if the entry ever returns.
 *
 * Initial stack layout, built downward from the 16-byte aligned stack top:
 *
 *   high  | arg1            |
 *         | arg0            |
 *         | entry           |
 *         | &launch         |  <- popped by ctxsw's ret
 *         | rbp = 0         |
 *         | rbx = 0         |
 *         | r12 = 0         |
 *         | r13 = 0         |
 *         | r14 = 0         |
 *         | r15 = 0         |
 *   low   | rflags = 0x2    |  <- saved stack pointer starts here
 *
 * Interrupts stay masked from the fabricated RFLAGS until launch runs, so
 * the tail of the reschedule that dispatched the process cannot be
 * preempted out from under it.
 */

use core::arch::naked_asm;

/// Entry signature for a process body. The two machine words are the
/// arguments captured at create() time.
pub type ProcEntry = extern "C" fn(u64, u64);

/// RFLAGS image for a first activation: reserved bit only, interrupts
/// masked.
const INITIAL_RFLAGS: u64 = 0x2;

/// Switch register images. Saves the outgoing image on the current stack
/// and stores the stack pointer through `old_sp`, then loads `new_sp` and
/// pops the incoming image.
///
/// # Safety
///
/// `old_sp` and `new_sp` must point at the saved-stack-pointer slots of
/// two PCBs, `new_sp` must hold a pointer produced by a prior ctxsw save
/// or by `init_stack`, and the caller must hold no locks: the incoming
/// process resumes in unrelated code.
#[unsafe(naked)]
pub unsafe extern "C" fn ctxsw(old_sp: *mut u64, new_sp: *const u64) {
    naked_asm!(
        // Outgoing image: callee-saved registers, flags last so they are
        // restored first on the way back in.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "pushfq",
        // Swap stacks through the PCB slots.
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        // Incoming image.
        "popfq",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// First-activation trampoline. The fabricated frame leaves the entry
/// pointer and both arguments on the stack; pop them into the argument
/// registers and hand off to the Rust-side startup shim. The final pop
/// leaves the stack pointer 16-byte aligned for the call.
#[unsafe(naked)]
unsafe extern "C" fn launch() -> ! {
    naked_asm!(
        "pop rdi", // entry function pointer
        "pop rsi", // arg0
        "pop rdx", // arg1
        "call {startup}",
        "ud2",
        startup = sym proc_startup,
    )
}

/// Rust half of the first activation: unmask interrupts and run the entry.
/// A process whose entry returns is terminated as if it had called exit.
extern "C" fn proc_startup(entry: u64, arg0: u64, arg1: u64) -> ! {
    super::interrupts::enable();
    let entry: ProcEntry = unsafe { core::mem::transmute(entry as usize) };
    entry(arg0, arg1);
    crate::kernel::proc::exit(0)
}

/// Fabricate the initial register image for a new process and return the
/// stack pointer value to store in its PCB.
///
/// # Safety
///
/// `stack_top` must be the 16-byte aligned upper end of a writable stack
/// at least `MIN_STACK` bytes deep.
pub unsafe fn init_stack(stack_top: *mut u64, entry: ProcEntry, arg0: u64, arg1: u64) -> u64 {
    let mut sp = stack_top;
    let mut push = |v: u64| unsafe {
        sp = sp.sub(1);
        sp.write(v);
    };
    push(arg1);
    push(arg0);
    push(entry as usize as u64);
    push(launch as usize as u64);
    for _ in 0..6 {
        push(0); // rbp, rbx, r12-r15
    }
    push(INITIAL_RFLAGS);
    sp as u64
}
