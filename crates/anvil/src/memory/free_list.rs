//! Lock-free global free list.
//!
//! A Treiber stack of slot indices. Links are kept in a side table of atomics
//! indexed by slot rather than inside the slot bytes: a thread that reads the
//! link of a node another thread has just popped races only with other
//! atomic accesses, never with the caller's writes to its `T`.
//!
//! The head packs `(generation << 32) | index` into one `AtomicU64`. Every
//! successful head update bumps the generation, so a stale head observed by
//! a stalled pop can never compare equal after the same node was popped and
//! pushed again (the ABA case). The guarantee holds unless the generation
//! wraps, which takes 2^32 head updates during one stalled retry.

use std::hint;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Link value marking the end of a list.
pub const NIL: u32 = u32::MAX;

#[inline]
fn pack(index: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// Per-slot `next` links shared by the global list and the thread caches.
///
/// A slot's link is only meaningful while the slot is free; whichever list
/// currently owns the slot is the only writer.
pub struct Links {
    next: Box<[AtomicU32]>,
}

impl Links {
    /// Create a table of `capacity` unlinked entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            next: (0..capacity).map(|_| AtomicU32::new(NIL)).collect(),
        }
    }

    #[inline]
    pub fn next(&self, index: u32) -> u32 {
        self.next[index as usize].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_next(&self, index: u32, next: u32) {
        self.next[index as usize].store(next, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }
}

/// A linked run of free slots, `first` to `last` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub first: u32,
    pub last: u32,
    pub len: usize,
}

/// Shared reservoir of free slots reachable from any thread.
pub struct GlobalFreeList {
    /// Tagged head; padded so it never shares a line with pool metadata
    head: CachePadded<AtomicU64>,
    links: Links,
    use_backoff: bool,
}

impl GlobalFreeList {
    /// Build a list holding every slot in `0..capacity`, lowest index on top.
    pub fn new(capacity: usize, use_backoff: bool) -> Self {
        let links = Links::new(capacity);
        for index in 1..capacity {
            links.set_next((index - 1) as u32, index as u32);
        }

        let first = if capacity == 0 { NIL } else { 0 };
        let head = CachePadded::new(AtomicU64::new(pack(NIL, 0)));
        // Publish every link before any thread can race to pop.
        head.store(pack(first, 0), Ordering::Release);

        Self {
            head,
            links,
            use_backoff,
        }
    }

    /// Link table shared with the thread caches.
    #[inline]
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Push a single free slot.
    pub fn push(&self, index: u32) {
        self.push_chain(Run {
            first: index,
            last: index,
            len: 1,
        });
    }

    /// Push an already linked run with a single CAS.
    ///
    /// The caller must own every slot of the run; `run.last`'s link is
    /// overwritten.
    pub fn push_chain(&self, run: Run) {
        let backoff = Backoff::new();
        let mut current = self.head.load(Ordering::Acquire);

        loop {
            let (top, generation) = unpack(current);
            self.links.set_next(run.last, top);

            let new = pack(run.first, generation.wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    self.relax(&backoff);
                }
            }
        }
    }

    /// Pop one free slot, or `None` when the list is empty.
    pub fn pop(&self) -> Option<u32> {
        self.pop_batch(1).map(|run| run.first)
    }

    /// Detach up to `max` slots from the top with a single CAS.
    ///
    /// The returned run keeps the list's order. Its `last` link still points
    /// into the global list and must be overwritten by the new owner.
    pub fn pop_batch(&self, max: usize) -> Option<Run> {
        let max = max.max(1);
        let backoff = Backoff::new();
        let mut current = self.head.load(Ordering::Acquire);

        loop {
            let (first, generation) = unpack(current);
            if first == NIL {
                return None;
            }

            // The walk may read links that change under us; the CAS below
            // fails in that case because any change bumps the generation.
            let mut last = first;
            let mut len = 1;
            while len < max {
                let next = self.links.next(last);
                if next == NIL {
                    break;
                }
                last = next;
                len += 1;
            }
            let rest = self.links.next(last);

            let new = pack(rest, generation.wrapping_add(1));
            match self
                .head
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(Run { first, last, len }),
                Err(actual) => {
                    current = actual;
                    self.relax(&backoff);
                }
            }
        }
    }

    /// Check whether the list was empty at the moment of the load.
    pub fn is_empty(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).0 == NIL
    }

    /// Count the free slots. Exclusive access guarantees a stable walk.
    pub fn count(&mut self) -> usize {
        let (mut index, _) = unpack(*self.head.get_mut());
        let mut count = 0;
        while index != NIL && count < self.links.len() {
            count += 1;
            index = self.links.next(index);
        }
        count
    }

    #[inline]
    fn relax(&self, backoff: &Backoff) {
        if self.use_backoff {
            backoff.spin();
        } else {
            hint::spin_loop();
        }
    }
}
