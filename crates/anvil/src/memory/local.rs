//! Per-thread free-list segments layered over the global list.
//!
//! A `LocalList` is only ever touched by the thread that owns it, so its
//! updates are plain loads and stores of the shared link table. It keeps the
//! common allocate/deallocate cycle off the global head, and the spill/refill
//! policy keeps freed capacity from getting stuck in one thread:
//!
//! - **spill**: when a deallocate pushes the list past its high-water mark,
//!   the oldest entries beyond half the mark go back to the global list in
//!   one CAS;
//! - **refill**: an allocate that finds the list empty pulls a whole batch
//!   from the global list in one CAS.

use std::ptr::NonNull;

use crate::memory::free_list::{GlobalFreeList, Links, Run, NIL};
use crate::memory::pool::{FixedPool, PoolError};

/// Owner-only free list threaded through the shared link table.
#[derive(Debug)]
pub struct LocalList {
    head: u32,
    tail: u32,
    len: usize,
}

impl Default for LocalList {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalList {
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take the most recently freed slot.
    #[inline]
    pub fn pop(&mut self, links: &Links) -> Option<u32> {
        if self.head == NIL {
            return None;
        }

        let index = self.head;
        self.head = links.next(index);
        self.len -= 1;
        if self.head == NIL {
            self.tail = NIL;
        }
        Some(index)
    }

    /// Put a freed slot on top.
    #[inline]
    pub fn push(&mut self, index: u32, links: &Links) {
        links.set_next(index, self.head);
        if self.head == NIL {
            self.tail = index;
        }
        self.head = index;
        self.len += 1;
    }

    /// Place a run detached from the global list on top, keeping its order.
    pub fn adopt(&mut self, run: Run, links: &Links) {
        links.set_next(run.last, self.head);
        if self.head == NIL {
            self.tail = run.last;
        }
        self.head = run.first;
        self.len += run.len;
    }

    /// Detach everything past the first `keep` entries.
    ///
    /// The detached run is the oldest part of the list and is still linked
    /// internally, ready for [`GlobalFreeList::push_chain`].
    pub fn split_off(&mut self, keep: usize, links: &Links) -> Option<Run> {
        if self.len <= keep {
            return None;
        }

        let run_len = self.len - keep;
        if keep == 0 {
            let run = Run {
                first: self.head,
                last: self.tail,
                len: run_len,
            };
            *self = Self::new();
            return Some(run);
        }

        let mut boundary = self.head;
        for _ in 1..keep {
            boundary = links.next(boundary);
        }

        let run = Run {
            first: links.next(boundary),
            last: self.tail,
            len: run_len,
        };
        links.set_next(boundary, NIL);
        self.tail = boundary;
        self.len = keep;
        Some(run)
    }

    /// Pull up to `batch` slots from the global list. Returns how many arrived.
    pub fn refill_from(&mut self, global: &GlobalFreeList, batch: usize) -> usize {
        match global.pop_batch(batch) {
            Some(run) => {
                self.adopt(run, global.links());
                run.len
            }
            None => 0,
        }
    }

    /// Return everything past the first `keep` entries to the global list.
    /// Returns how many slots left.
    pub fn spill_into(&mut self, global: &GlobalFreeList, keep: usize) -> usize {
        match self.split_off(keep, global.links()) {
            Some(run) => {
                global.push_chain(run);
                run.len
            }
            None => 0,
        }
    }
}

/// Explicit per-thread cache handle.
///
/// An alternative to the pool's implicit per-thread registry for callers
/// that want deterministic ownership: the handle carries its own free-list
/// segment, and dropping it returns every cached slot to the global list.
///
/// # Examples
/// ```
/// # use anvil::FixedPool;
/// let pool = FixedPool::<u64>::new(8).unwrap();
/// let mut cache = pool.cache();
///
/// let slot = cache.allocate().unwrap();
/// unsafe { cache.deallocate(slot) };
/// assert_eq!(cache.allocate().unwrap(), slot);
/// ```
pub struct ThreadCache<'a, T> {
    pool: &'a FixedPool<T>,
    list: LocalList,
}

impl<'a, T> ThreadCache<'a, T> {
    pub(crate) fn new(pool: &'a FixedPool<T>) -> Self {
        Self {
            pool,
            list: LocalList::new(),
        }
    }

    /// Allocate a slot, preferring the slots this handle freed itself.
    pub fn allocate(&mut self) -> Result<NonNull<T>, PoolError> {
        self.pool.allocate_with(&mut self.list)
    }

    /// Return a slot through this handle.
    ///
    /// # Safety
    /// Same contract as [`FixedPool::deallocate`].
    pub unsafe fn deallocate(&mut self, ptr: NonNull<T>) {
        self.pool.release_with(&mut self.list, ptr);
    }

    /// Number of slots currently parked in this handle.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Return every parked slot to the global list.
    pub fn flush(&mut self) -> usize {
        self.pool.flush_list(&mut self.list)
    }

    /// The pool this handle draws from.
    pub fn pool(&self) -> &'a FixedPool<T> {
        self.pool
    }
}

impl<T> Drop for ThreadCache<'_, T> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(list: &mut LocalList, links: &Links) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(index) = list.pop(links) {
            out.push(index);
        }
        out
    }

    #[test]
    fn test_local_list_is_lifo() {
        let links = Links::new(8);
        let mut list = LocalList::new();

        list.push(3, &links);
        list.push(5, &links);
        list.push(1, &links);
        assert_eq!(list.len(), 3);

        assert_eq!(drain(&mut list, &links), vec![1, 5, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_split_off_keeps_most_recent() {
        let links = Links::new(8);
        let mut list = LocalList::new();
        for index in 0..6 {
            list.push(index, &links);
        }

        let run = list.split_off(2, &links).unwrap();
        assert_eq!(run, Run { first: 3, last: 0, len: 4 });
        assert_eq!(list.len(), 2);

        // The run is still linked 3 -> 2 -> 1 -> 0.
        assert_eq!(links.next(3), 2);
        assert_eq!(links.next(1), 0);

        assert_eq!(drain(&mut list, &links), vec![5, 4]);
    }

    #[test]
    fn test_split_off_everything() {
        let links = Links::new(4);
        let mut list = LocalList::new();
        list.push(0, &links);
        list.push(1, &links);

        let run = list.split_off(0, &links).unwrap();
        assert_eq!(run, Run { first: 1, last: 0, len: 2 });
        assert!(list.is_empty());
        assert_eq!(list.split_off(0, &links), None);
    }

    #[test]
    fn test_refill_and_spill_roundtrip() {
        let mut global = GlobalFreeList::new(10, true);
        let mut list = LocalList::new();

        assert_eq!(list.refill_from(&global, 4), 4);
        assert_eq!(list.len(), 4);
        assert_eq!(global.count(), 6);

        // Refilled slots come out in global order.
        assert_eq!(list.pop(global.links()), Some(0));
        list.push(0, global.links());

        assert_eq!(list.spill_into(&global, 1), 3);
        assert_eq!(list.len(), 1);
        assert_eq!(global.count(), 9);

        assert_eq!(list.spill_into(&global, 0), 1);
        assert_eq!(global.count(), 10);
    }

    #[test]
    fn test_adopt_onto_non_empty_list() {
        let global = GlobalFreeList::new(6, true);
        let mut list = LocalList::new();

        let first = global.pop().unwrap();
        list.push(first, global.links());
        list.refill_from(&global, 2);

        assert_eq!(list.len(), 3);
        assert_eq!(drain(&mut list, global.links()), vec![1, 2, 0]);
    }
}
