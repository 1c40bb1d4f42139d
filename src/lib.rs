/*
 * CORTEN Microkernel Core
 *
 * A small preemptive kernel core in the Xinu tradition: a fixed process
 * table, a priority-ordered ready list, counting semaphores with FIFO
 * wait lists, a delta-list sleep queue driven by an external clock tick,
 * software timers and a single-slot message rendezvous. Everything is a
 * transition over shared tables protected by one masked-interrupt
 * critical section.
 *
 * The crate is a library. The embedder supplies boot staging and
 * interrupt plumbing, calls `init()` from the context that is to become
 * the null process, drives `clock::tick()` at CLKFREQ Hz, and may hook a
 * console sink into the log backend via `utils::logger::init`.
 *
 * Hosted builds (anything but target_os = "none") compile the same state
 * machine with a simulated interrupt mask, which is how the test suite
 * drives real processes through the real context switch under cargo test.
 */

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod kernel;
pub mod memory;
pub mod params;
pub mod utils;

pub use crate::kernel::error::{KernelError, KernelResult};
pub use crate::kernel::{clock, msg, proc, queue, sched, sem, timer};
pub use crate::kernel::{context_switches, dump_processes, init, integrity_check, is_initialized};
