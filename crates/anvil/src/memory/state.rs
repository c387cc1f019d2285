//! Out-of-band slot ownership tags, compiled into debug builds only.
//!
//! The production path identifies slots purely by address. In debug builds
//! every slot also carries a tag recording whether the pool or the caller
//! owns it, so double issuance and double frees fail loudly instead of
//! corrupting a free list.

use std::sync::atomic::{AtomicU8, Ordering};

const FREE: u8 = 0;
const ALLOCATED: u8 = 1;

pub struct SlotStates {
    tags: Box<[AtomicU8]>,
}

impl SlotStates {
    /// Every slot starts out free.
    pub fn new(capacity: usize) -> Self {
        Self {
            tags: (0..capacity).map(|_| AtomicU8::new(FREE)).collect(),
        }
    }

    /// Record that `index` was handed to a caller.
    ///
    /// # Panics
    /// Panics if the slot was already allocated, which means a free list
    /// handed out the same slot twice.
    pub fn mark_allocated(&self, index: u32) {
        let previous = self.tags[index as usize].swap(ALLOCATED, Ordering::AcqRel);
        assert_eq!(
            previous, FREE,
            "slot {} issued while still allocated",
            index
        );
    }

    /// Record that `index` came back. Returns `false` if it was not allocated.
    pub fn mark_free(&self, index: u32) -> bool {
        self.tags[index as usize]
            .compare_exchange(ALLOCATED, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Number of slots currently owned by callers.
    pub fn allocated(&self) -> usize {
        self.tags
            .iter()
            .filter(|tag| tag.load(Ordering::Acquire) == ALLOCATED)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_then_free() {
        let states = SlotStates::new(4);

        states.mark_allocated(2);
        assert_eq!(states.allocated(), 1);

        assert!(states.mark_free(2));
        assert_eq!(states.allocated(), 0);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let states = SlotStates::new(4);
        states.mark_allocated(1);

        assert!(states.mark_free(1));
        assert!(!states.mark_free(1));
    }

    #[test]
    fn test_free_of_never_issued_slot_is_rejected() {
        let states = SlotStates::new(4);
        assert!(!states.mark_free(3));
    }

    #[test]
    #[should_panic(expected = "issued while still allocated")]
    fn test_double_issue_panics() {
        let states = SlotStates::new(2);
        states.mark_allocated(0);
        states.mark_allocated(0);
    }
}
