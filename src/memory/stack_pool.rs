/*
 * Process Stack Pool
 *
 * Stacks are the only memory the core allocates. They come from a fixed
 * static arena managed by a first-fit allocator, so the kernel never
 * touches a general heap and stack exhaustion is an ordinary error, not
 * an allocator abort.
 *
 * Requests are made in rounded sizes (create() rounds to a 16-byte
 * multiple), and a freed stack must be returned with the same size it
 * was granted with.
 */

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use spin::Mutex;

use crate::kernel::error::{KernelError, KernelResult};
use crate::params::STACK_POOL_BYTES;

#[repr(C, align(16))]
struct Arena(UnsafeCell<[u8; STACK_POOL_BYTES]>);

// The arena is only ever touched through the pool mutex.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; STACK_POOL_BYTES]));
static POOL: Mutex<Heap> = Mutex::new(Heap::empty());

fn stack_layout(bytes: usize) -> Layout {
    Layout::from_size_align(bytes, 16).expect("stack layout")
}

/// Hand the arena to the allocator. Called once from kernel init;
/// repeated calls are ignored.
pub(crate) fn init() {
    let mut pool = POOL.lock();
    if pool.size() == 0 {
        unsafe { pool.init(ARENA.0.get() as *mut u8, STACK_POOL_BYTES) };
    }
}

/// Allocate a stack of `bytes` (16-byte aligned) and return its base
/// address. The usable stack top is `base + bytes`.
pub(crate) fn alloc_stack(bytes: usize) -> KernelResult<usize> {
    POOL.lock()
        .allocate_first_fit(stack_layout(bytes))
        .map(|p| p.as_ptr() as usize)
        .map_err(|_| KernelError::OutOfStack)
}

/// Return a stack to the pool. `bytes` must match the granted size.
pub(crate) fn free_stack(base: usize, bytes: usize) {
    if base == 0 {
        return;
    }
    unsafe {
        POOL.lock()
            .deallocate(NonNull::new_unchecked(base as *mut u8), stack_layout(bytes));
    }
}
