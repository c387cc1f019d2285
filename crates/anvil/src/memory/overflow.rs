//! What a pool does once every free list is empty.

use std::alloc::{GlobalAlloc, Layout, System};
#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(debug_assertions)]
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::memory::pool::PoolError;

/// Overflow behaviour, fixed for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Report exhaustion and never touch the general heap.
    #[default]
    Bounded,
    /// Serve the request from the general heap and release it there on
    /// deallocate.
    HeapOverflow,
}

/// Applies a pool's [`OverflowMode`].
pub struct OverflowPolicy {
    mode: OverflowMode,
    /// Layout of one heap slot, identical to a backing slot
    slot: Layout,
    /// Heap slots handed out and not yet released
    live: AtomicUsize,
    /// Addresses of live heap slots
    #[cfg(debug_assertions)]
    issued: Mutex<HashSet<usize>>,
}

impl OverflowPolicy {
    pub fn new(mode: OverflowMode, slot: Layout) -> Self {
        Self {
            mode,
            slot,
            live: AtomicUsize::new(0),
            #[cfg(debug_assertions)]
            issued: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> OverflowMode {
        self.mode
    }

    /// Handle a request that missed both the thread cache and the global list.
    pub fn on_exhausted(&self, capacity: usize) -> Result<NonNull<u8>, PoolError> {
        match self.mode {
            OverflowMode::Bounded => {
                trace!(capacity, "Pool exhausted");
                Err(PoolError::Exhausted { capacity })
            }
            OverflowMode::HeapOverflow => {
                let ptr = unsafe { System.alloc(self.slot) };
                let ptr = NonNull::new(ptr).ok_or(PoolError::OverflowAllocationFailed {
                    size: self.slot.size(),
                    align: self.slot.align(),
                })?;

                #[cfg(debug_assertions)]
                self.issued
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(ptr.as_ptr() as usize);

                let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(capacity, live, "Pool exhausted, serving slot from the heap");
                Ok(ptr)
            }
        }
    }

    /// Release a slot that lies outside the backing store.
    ///
    /// Returns `false` when the pointer cannot have come from this policy:
    /// always in bounded mode, and in debug builds for any address that is
    /// not a live heap slot. Nothing is freed in that case.
    ///
    /// # Safety
    /// In [`OverflowMode::HeapOverflow`], `ptr` must have been returned by
    /// [`OverflowPolicy::on_exhausted`] of this policy and not released since.
    pub unsafe fn release(&self, ptr: NonNull<u8>) -> bool {
        match self.mode {
            OverflowMode::Bounded => false,
            OverflowMode::HeapOverflow => {
                #[cfg(debug_assertions)]
                {
                    let known = self
                        .issued
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&(ptr.as_ptr() as usize));
                    if !known {
                        return false;
                    }
                }

                System.dealloc(ptr.as_ptr(), self.slot);
                self.live.fetch_sub(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Heap slots currently handed out.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> Layout {
        Layout::from_size_align(64, 64).unwrap()
    }

    #[test]
    fn test_bounded_reports_exhaustion() {
        let policy = OverflowPolicy::new(OverflowMode::Bounded, slot());

        let result = policy.on_exhausted(4);
        assert!(matches!(result, Err(PoolError::Exhausted { capacity: 4 })));
        assert_eq!(policy.live(), 0);
    }

    #[test]
    fn test_heap_overflow_roundtrip() {
        let policy = OverflowPolicy::new(OverflowMode::HeapOverflow, slot());

        let ptr = policy.on_exhausted(4).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        assert_eq!(policy.live(), 1);

        assert!(unsafe { policy.release(ptr) });
        assert_eq!(policy.live(), 0);
    }

    #[test]
    fn test_bounded_refuses_release() {
        let policy = OverflowPolicy::new(OverflowMode::Bounded, slot());
        let mut local = 0u64;
        let ptr = NonNull::from(&mut local).cast::<u8>();

        assert!(!unsafe { policy.release(ptr) });
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_unknown_heap_pointer_is_refused_in_debug() {
        let policy = OverflowPolicy::new(OverflowMode::HeapOverflow, slot());
        let ptr = policy.on_exhausted(4).unwrap();

        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();
        assert!(!unsafe { policy.release(foreign) });
        assert_eq!(policy.live(), 1);

        assert!(unsafe { policy.release(ptr) });
        assert!(!unsafe { policy.release(ptr) });
        assert_eq!(policy.live(), 0);
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&OverflowMode::HeapOverflow).unwrap();
        assert_eq!(json, "\"heap_overflow\"");

        let mode: OverflowMode = serde_json::from_str("\"bounded\"").unwrap();
        assert_eq!(mode, OverflowMode::Bounded);
    }
}
