/*
 * Kernel Configuration Constants
 *
 * Compile-time sizing and policy knobs for the CORTEN core. Everything here
 * is a plain constant: the kernel has no runtime configuration surface, and
 * all tables are statically sized from these values.
 */

/// Number of process table entries, including the null process in slot 0.
pub const NPROC: usize = 8;

/// Number of semaphore table entries.
pub const NSEM: usize = 8;

/// Number of cells in the queue entry pool. Every kernel list draws its
/// head/tail sentinels and body cells from this pool, so it is sized for
/// all processes plus sentinel headroom.
pub const NQENT: usize = NPROC + NSEM + 4;

/// Number of software timer table entries.
pub const NTIMERS: usize = 32;

/// Maximum process name length in bytes. Longer names are truncated.
pub const NAMELEN: usize = 15;

/// Process priority. Higher values are favored by the scheduler.
pub type Prio = i16;

/// Lowest priority; held by the null process.
pub const PRIO_MIN: Prio = 0;

/// Highest priority a process can hold.
pub const PRIO_MAX: Prio = 99;

/// Priority assigned when the caller has no opinion.
pub const PRIO_DEFAULT: Prio = 20;

/// Clock tick rate expected from the external tick source, in Hz.
pub const CLKFREQ: u32 = 1000;

/// Milliseconds represented by one clock tick.
pub const MS_PER_TICK: u32 = 1000 / CLKFREQ;

/// Default preemption quantum, in ticks.
pub const QUANTUM: u32 = 10;

/// Minimum process stack size in bytes; smaller requests are rounded up.
pub const MIN_STACK: usize = 256;

/// Convenience stack size for ordinary processes.
pub const DEFAULT_STACK: usize = 16 * 1024;

/// Total bytes in the static stack arena.
pub const STACK_POOL_BYTES: usize = 256 * 1024;

/// Longest sleep accepted, in ticks. Bounded by the delta-list key width.
pub const MAX_SLEEP: u32 = i32::MAX as u32;

/// Pid of the null process. Created at init, never terminates.
pub const NULLPROC: usize = 0;
