/*
 * Intrusive Queue Pool
 *
 * Every kernel list except the semaphore wait lists lives in one fixed
 * arena of doubly-linked cells addressed by small indices: the priority
 * ready list and the sleep delta list. Pointer graphs are avoided
 * entirely; the arena owns the cells and a list is just an index walk.
 *
 * A live queue is a head sentinel (key +infinity) and a tail sentinel
 * (key -infinity) with body cells between them. A queue id is the index
 * of its head sentinel. Body cells carry a signed key, which is a
 * priority for ordered lists and a tick delta for delta lists, and a pid
 * payload.
 *
 * The pool performs no masking of its own; callers hold the interrupt
 * mask for the duration of any operation.
 */

use crate::kernel::NIL;
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::proc::Pid;
use crate::params::{NPROC, NQENT};

/// Queue identifier: index of the queue's head sentinel in the pool.
pub type Qid = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Free,
    Head,
    Tail,
    Body,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    state: CellState,
    key: i32,
    pid: usize,
    next: usize,
    prev: usize,
}

impl Cell {
    const fn free() -> Self {
        Self {
            state: CellState::Free,
            key: 0,
            pid: NIL,
            next: NIL,
            prev: NIL,
        }
    }
}

/// Fixed arena of list cells with an internal free list.
pub struct QueuePool {
    cells: [Cell; NQENT],
    free: usize,
    live_queues: usize,
}

impl QueuePool {
    pub const fn new() -> Self {
        Self {
            cells: [const { Cell::free() }; NQENT],
            free: NIL,
            live_queues: 0,
        }
    }

    /// Chain every cell onto the free list. Called once at kernel init.
    pub fn init(&mut self) {
        for i in 0..NQENT {
            self.cells[i] = Cell::free();
            self.cells[i].next = if i + 1 < NQENT { i + 1 } else { NIL };
        }
        self.free = 0;
        self.live_queues = 0;
    }

    fn alloc_cell(&mut self) -> KernelResult<usize> {
        let idx = self.free;
        if idx == NIL {
            return Err(KernelError::OutOfQueues);
        }
        self.free = self.cells[idx].next;
        Ok(idx)
    }

    fn release_cell(&mut self, idx: usize) {
        self.cells[idx] = Cell::free();
        self.cells[idx].next = self.free;
        self.free = idx;
    }

    fn check_queue(&self, q: Qid) -> KernelResult<()> {
        if q >= NQENT || self.cells[q].state != CellState::Head {
            return Err(KernelError::BadQueueId);
        }
        Ok(())
    }

    fn check_pid(pid: Pid) -> KernelResult<()> {
        if pid.0 >= NPROC {
            return Err(KernelError::BadPid);
        }
        Ok(())
    }

    fn tail_of(&self, q: Qid) -> usize {
        let mut idx = self.cells[q].next;
        while self.cells[idx].state != CellState::Tail {
            idx = self.cells[idx].next;
        }
        idx
    }

    /// Link a fresh body cell immediately before `before`.
    fn link_before(&mut self, cell: usize, before: usize, pid: Pid, key: i32) {
        let prev = self.cells[before].prev;
        self.cells[cell] = Cell {
            state: CellState::Body,
            key,
            pid: pid.0,
            next: before,
            prev,
        };
        self.cells[prev].next = cell;
        self.cells[before].prev = cell;
    }

    fn unlink(&mut self, cell: usize) {
        let prev = self.cells[cell].prev;
        let next = self.cells[cell].next;
        self.cells[prev].next = next;
        self.cells[next].prev = prev;
        self.release_cell(cell);
    }

    fn find(&self, pid: Pid, q: Qid) -> Option<usize> {
        let mut idx = self.cells[q].next;
        while self.cells[idx].state == CellState::Body {
            if self.cells[idx].pid == pid.0 {
                return Some(idx);
            }
            idx = self.cells[idx].next;
        }
        None
    }

    /// Allocate a new empty queue and return its id.
    pub fn new_queue(&mut self) -> KernelResult<Qid> {
        let head = self.alloc_cell()?;
        let tail = match self.alloc_cell() {
            Ok(t) => t,
            Err(e) => {
                self.release_cell(head);
                return Err(e);
            }
        };
        self.cells[head] = Cell {
            state: CellState::Head,
            key: i32::MAX,
            pid: NIL,
            next: tail,
            prev: NIL,
        };
        self.cells[tail] = Cell {
            state: CellState::Tail,
            key: i32::MIN,
            pid: NIL,
            next: NIL,
            prev: head,
        };
        self.live_queues += 1;
        Ok(head)
    }

    /// Append `pid` at the tail end of a FIFO queue.
    pub fn enqueue(&mut self, pid: Pid, q: Qid) -> KernelResult<()> {
        self.check_queue(q)?;
        Self::check_pid(pid)?;
        let cell = self.alloc_cell()?;
        let tail = self.tail_of(q);
        self.link_before(cell, tail, pid, 0);
        Ok(())
    }

    /// Remove and return the pid just after the head, if any.
    pub fn dequeue(&mut self, q: Qid) -> Option<Pid> {
        if self.check_queue(q).is_err() {
            return None;
        }
        let first = self.cells[q].next;
        if self.cells[first].state != CellState::Body {
            return None;
        }
        let pid = self.cells[first].pid;
        self.unlink(first);
        Some(Pid(pid))
    }

    /// Insert in descending key order. Equal keys keep arrival order: the
    /// new entry lands behind existing entries with the same key.
    pub fn insert(&mut self, pid: Pid, q: Qid, key: i32) -> KernelResult<()> {
        self.check_queue(q)?;
        Self::check_pid(pid)?;
        let cell = self.alloc_cell()?;
        let mut curr = self.cells[q].next;
        while self.cells[curr].state == CellState::Body && self.cells[curr].key >= key {
            curr = self.cells[curr].next;
        }
        self.link_before(cell, curr, pid, key);
        Ok(())
    }

    /// Insert into a delta list. Walking from the head, the key is reduced
    /// by each delta passed over; the entry is placed before the first
    /// cell whose delta exceeds what remains, and that cell's delta is
    /// reduced by the remainder.
    pub fn insert_delta(&mut self, pid: Pid, q: Qid, key: i32) -> KernelResult<()> {
        self.check_queue(q)?;
        Self::check_pid(pid)?;
        if key < 0 {
            return Err(KernelError::BadArgument);
        }
        let cell = self.alloc_cell()?;
        let mut remaining = key;
        let mut curr = self.cells[q].next;
        while self.cells[curr].state == CellState::Body {
            if self.cells[curr].key > remaining {
                self.cells[curr].key -= remaining;
                break;
            }
            remaining -= self.cells[curr].key;
            curr = self.cells[curr].next;
        }
        self.link_before(cell, curr, pid, remaining);
        Ok(())
    }

    /// Remove a specific pid from a plain (non-delta) queue.
    pub fn remove(&mut self, pid: Pid, q: Qid) -> KernelResult<()> {
        self.check_queue(q)?;
        Self::check_pid(pid)?;
        let cell = self.find(pid, q).ok_or(KernelError::BadPid)?;
        self.unlink(cell);
        Ok(())
    }

    /// Remove a specific pid from a delta list, folding its delta into
    /// the successor so the absolute positions of later entries hold.
    pub fn remove_delta(&mut self, pid: Pid, q: Qid) -> KernelResult<()> {
        self.check_queue(q)?;
        Self::check_pid(pid)?;
        let cell = self.find(pid, q).ok_or(KernelError::BadPid)?;
        let next = self.cells[cell].next;
        if self.cells[next].state == CellState::Body {
            self.cells[next].key = self.cells[next].key.saturating_add(self.cells[cell].key);
        }
        self.unlink(cell);
        Ok(())
    }

    /// Pid of the first body entry, if any.
    pub fn first(&self, q: Qid) -> Option<Pid> {
        self.check_queue(q).ok()?;
        let first = self.cells[q].next;
        (self.cells[first].state == CellState::Body).then(|| Pid(self.cells[first].pid))
    }

    /// Pid of the last body entry, if any.
    pub fn last(&self, q: Qid) -> Option<Pid> {
        self.check_queue(q).ok()?;
        let tail = self.tail_of(q);
        let last = self.cells[tail].prev;
        (self.cells[last].state == CellState::Body).then(|| Pid(self.cells[last].pid))
    }

    /// Key of the first body entry, if any.
    pub fn first_key(&self, q: Qid) -> Option<i32> {
        self.check_queue(q).ok()?;
        let first = self.cells[q].next;
        (self.cells[first].state == CellState::Body).then(|| self.cells[first].key)
    }

    /// Decrement the first body entry's key and return the new value.
    /// The clock uses this to age the sleep list head once per tick.
    pub fn dec_first_key(&mut self, q: Qid) -> Option<i32> {
        self.check_queue(q).ok()?;
        let first = self.cells[q].next;
        if self.cells[first].state != CellState::Body {
            return None;
        }
        self.cells[first].key -= 1;
        Some(self.cells[first].key)
    }

    pub fn len(&self, q: Qid) -> usize {
        let mut count = 0;
        if self.check_queue(q).is_err() {
            return 0;
        }
        let mut idx = self.cells[q].next;
        while self.cells[idx].state == CellState::Body {
            count += 1;
            idx = self.cells[idx].next;
        }
        count
    }

    pub fn is_empty(&self, q: Qid) -> bool {
        self.len(q) == 0
    }

    /// Number of live queues drawing on the pool.
    pub fn queue_count(&self) -> usize {
        self.live_queues
    }

    pub fn contains(&self, pid: Pid, q: Qid) -> bool {
        if Self::check_pid(pid).is_err() {
            return false;
        }
        self.check_queue(q).is_ok() && self.find(pid, q).is_some()
    }

    /// Visit every body entry in list order as (pid, key) pairs.
    pub(crate) fn for_each(&self, q: Qid, mut f: impl FnMut(usize, i32)) {
        if self.check_queue(q).is_err() {
            return;
        }
        let mut idx = self.cells[q].next;
        while self.cells[idx].state == CellState::Body {
            f(self.cells[idx].pid, self.cells[idx].key);
            idx = self.cells[idx].next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_queue() -> (QueuePool, Qid) {
        let mut pool = QueuePool::new();
        pool.init();
        let q = pool.new_queue().unwrap();
        (pool, q)
    }

    fn drain(pool: &mut QueuePool, q: Qid) -> std::vec::Vec<usize> {
        let mut out = std::vec::Vec::new();
        while let Some(pid) = pool.dequeue(q) {
            out.push(pid.0);
        }
        out
    }

    #[test]
    fn fifo_preserves_arrival_order() {
        let (mut pool, q) = pool_with_queue();
        for pid in [3, 1, 5] {
            pool.enqueue(Pid(pid), q).unwrap();
        }
        assert_eq!(pool.len(q), 3);
        assert_eq!(pool.first(q), Some(Pid(3)));
        assert_eq!(pool.last(q), Some(Pid(5)));
        assert_eq!(drain(&mut pool, q), [3, 1, 5]);
        assert!(pool.is_empty(q));
    }

    #[test]
    fn ordered_insert_is_descending_with_fifo_ties() {
        let (mut pool, q) = pool_with_queue();
        pool.insert(Pid(1), q, 40).unwrap();
        pool.insert(Pid(2), q, 60).unwrap();
        pool.insert(Pid(3), q, 40).unwrap();
        pool.insert(Pid(4), q, 10).unwrap();
        // Ties keep arrival order: 1 before 3.
        assert_eq!(drain(&mut pool, q), [2, 1, 3, 4]);
    }

    #[test]
    fn delta_insert_accumulates_offsets() {
        let (mut pool, q) = pool_with_queue();
        // Absolute delays 50, 30, 70 arrive in that order.
        pool.insert_delta(Pid(1), q, 50).unwrap();
        pool.insert_delta(Pid(2), q, 30).unwrap();
        pool.insert_delta(Pid(3), q, 70).unwrap();
        let mut seen = std::vec::Vec::new();
        pool.for_each(q, |pid, key| seen.push((pid, key)));
        assert_eq!(seen, [(2, 30), (1, 20), (3, 20)]);
    }

    #[test]
    fn delta_removal_propagates_to_successor() {
        let (mut pool, q) = pool_with_queue();
        pool.insert_delta(Pid(1), q, 50).unwrap();
        pool.insert_delta(Pid(2), q, 30).unwrap();
        pool.insert_delta(Pid(3), q, 70).unwrap();
        pool.remove_delta(Pid(1), q).unwrap();
        let mut seen = std::vec::Vec::new();
        pool.for_each(q, |pid, key| seen.push((pid, key)));
        // Pid 3 keeps its absolute position: 30 + 40 = 70.
        assert_eq!(seen, [(2, 30), (3, 40)]);
    }

    #[test]
    fn plain_removal_drops_the_entry() {
        let (mut pool, q) = pool_with_queue();
        pool.insert(Pid(1), q, 30).unwrap();
        pool.insert(Pid(2), q, 20).unwrap();
        pool.insert(Pid(3), q, 10).unwrap();
        pool.remove(Pid(2), q).unwrap();
        assert!(!pool.contains(Pid(2), q));
        assert_eq!(drain(&mut pool, q), [1, 3]);
        assert_eq!(pool.remove(Pid(2), q), Err(KernelError::BadPid));
    }

    #[test]
    fn head_aging_feeds_expiry() {
        let (mut pool, q) = pool_with_queue();
        pool.insert_delta(Pid(1), q, 2).unwrap();
        pool.insert_delta(Pid(2), q, 2).unwrap();
        assert_eq!(pool.dec_first_key(q), Some(1));
        assert_eq!(pool.dec_first_key(q), Some(0));
        assert_eq!(pool.dequeue(q), Some(Pid(1)));
        // Successor was inserted with delta 0 relative to pid 1.
        assert_eq!(pool.first_key(q), Some(0));
    }

    #[test]
    fn pool_exhaustion_reports_out_of_queues() {
        let mut pool = QueuePool::new();
        pool.init();
        let q = pool.new_queue().unwrap();
        let mut inserted = 0;
        loop {
            match pool.enqueue(Pid(1), q) {
                Ok(()) => inserted += 1,
                Err(KernelError::OutOfQueues) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(inserted, NQENT - 2);
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let (mut pool, q) = pool_with_queue();
        assert_eq!(pool.enqueue(Pid(NPROC), q), Err(KernelError::BadPid));
        assert_eq!(pool.enqueue(Pid(1), q + 1), Err(KernelError::BadQueueId));
        assert_eq!(pool.dequeue(NQENT + 3), None);
        assert_eq!(pool.insert(Pid(1), 999, 5), Err(KernelError::BadQueueId));
    }
}
