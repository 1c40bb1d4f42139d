/*
 * Kernel Error Types
 *
 * One crate-wide error enum covers every failure a kernel primitive can
 * report: bad identifiers, bad arguments, operations invalid in the
 * current process state, table exhaustion, cancellation and timeouts.
 * Invariant violations are not represented here; those panic.
 */

use core::fmt;

/// Result alias used by every fallible kernel primitive.
pub type KernelResult<T> = Result<T, KernelError>;

/// Error kinds reported by the kernel primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Process id out of range or names no live process.
    BadPid,
    /// Semaphore id out of range or names a freed slot.
    BadSemId,
    /// Timer id out of range or names a freed slot.
    BadTimerId,
    /// Queue id does not name an allocated queue head.
    BadQueueId,
    /// Argument outside its legal domain (negative count, zero delay, ...).
    BadArgument,
    /// Operation not permitted in the target's current state.
    WrongState,
    /// The target's single message slot is already occupied.
    MessagePending,
    /// No free process table slot.
    NoFreeProc,
    /// No free semaphore table slot.
    NoFreeSem,
    /// No free software timer slot.
    NoFreeTimer,
    /// Queue entry pool exhausted.
    OutOfQueues,
    /// Stack pool could not satisfy the request.
    OutOfStack,
    /// The semaphore was deleted or reset while the caller waited.
    Deleted,
    /// Non-blocking acquire would have blocked.
    WouldBlock,
    /// A timed operation expired before completing.
    Timeout,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::BadPid => write!(f, "invalid process id"),
            KernelError::BadSemId => write!(f, "invalid semaphore id"),
            KernelError::BadTimerId => write!(f, "invalid timer id"),
            KernelError::BadQueueId => write!(f, "invalid queue id"),
            KernelError::BadArgument => write!(f, "argument out of range"),
            KernelError::WrongState => write!(f, "operation invalid in current state"),
            KernelError::MessagePending => write!(f, "message slot occupied"),
            KernelError::NoFreeProc => write!(f, "process table full"),
            KernelError::NoFreeSem => write!(f, "semaphore table full"),
            KernelError::NoFreeTimer => write!(f, "timer table full"),
            KernelError::OutOfQueues => write!(f, "queue entry pool exhausted"),
            KernelError::OutOfStack => write!(f, "stack pool exhausted"),
            KernelError::Deleted => write!(f, "semaphore deleted while waiting"),
            KernelError::WouldBlock => write!(f, "operation would block"),
            KernelError::Timeout => write!(f, "timed out"),
        }
    }
}
