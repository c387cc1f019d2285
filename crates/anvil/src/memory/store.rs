//! Cache-line aligned backing storage for pool slots.
//!
//! The store is inert bytes: it never constructs or drops `T`. It only knows
//! the size and alignment of a slot and can map between slot indices and
//! addresses in O(1).

use std::alloc::{GlobalAlloc, Layout, System};
use std::mem;
use std::ptr::NonNull;

use crate::memory::pool::PoolError;

/// Assumed destructive interference size of the target.
///
/// Recent x86_64 and aarch64 cores pull cache lines in adjacent pairs, so two
/// slots only stop interfering once they sit 128 bytes apart.
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64"
))]
pub const CACHE_LINE_SIZE: usize = 128;

/// Assumed destructive interference size of the target.
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64"
)))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Size and alignment of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Layout of a single slot; `size()` is the stride between slots
    layout: Layout,
    /// `log2(stride)` when the stride is a power of two
    stride_shift: Option<u32>,
}

impl SlotLayout {
    /// Compute the slot layout for `T` with at least `alignment` bytes of alignment.
    ///
    /// The effective alignment is the larger of `alignment` and `T`'s natural
    /// alignment. The stride is `size_of::<T>()` (at least one byte, so
    /// zero-sized types still get distinct addresses) rounded up to it.
    ///
    /// # Examples
    /// ```
    /// # use anvil::memory::store::SlotLayout;
    /// let slot = SlotLayout::for_type::<u64>(64).unwrap();
    /// assert_eq!(slot.align(), 64);
    /// assert_eq!(slot.stride(), 64);
    /// ```
    pub fn for_type<T>(alignment: usize) -> Result<Self, PoolError> {
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment { alignment });
        }

        let align = alignment.max(mem::align_of::<T>());
        let size = mem::size_of::<T>().max(1);

        let layout = Layout::from_size_align(size, align)
            .map_err(|e| PoolError::InvalidConfig {
                reason: format!("slot layout: {}", e),
            })?
            .pad_to_align();

        let stride = layout.size();
        let stride_shift = stride
            .is_power_of_two()
            .then(|| stride.trailing_zeros());

        Ok(Self {
            layout,
            stride_shift,
        })
    }

    /// Distance in bytes between two adjacent slots.
    pub fn stride(&self) -> usize {
        self.layout.size()
    }

    /// Alignment of every slot.
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Layout of a single slot, as used for heap overflow slots.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

/// Result of classifying an address against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLookup {
    /// The address is the start of the slot with this index
    Inside(usize),
    /// The address lies in the store but not on a slot boundary
    Misaligned,
    /// The address lies outside the store
    Outside,
}

/// Fixed-length buffer holding exactly `capacity` slots.
pub struct BackingStore {
    /// Pointer to the allocated buffer
    base: NonNull<u8>,
    /// Layout used for the buffer allocation
    layout: Layout,
    /// Per-slot layout
    slot: SlotLayout,
    /// Number of slots
    capacity: usize,
}

impl BackingStore {
    /// Reserve storage for `capacity` slots of the given layout.
    ///
    /// Failure to reserve the buffer is a construction error; nothing is
    /// retried.
    pub fn new(slot: SlotLayout, capacity: usize) -> Result<Self, PoolError> {
        let total = slot
            .stride()
            .checked_mul(capacity)
            .filter(|&total| total > 0)
            .ok_or_else(|| {
                PoolError::AllocationFailed(format!(
                    "cannot size a store of {} slots of {} bytes",
                    capacity,
                    slot.stride()
                ))
            })?;

        let layout = Layout::from_size_align(total, slot.align())
            .map_err(|e| PoolError::AllocationFailed(format!("Invalid layout: {}", e)))?;

        // Allocate the backing buffer
        let base = unsafe {
            let ptr = System.alloc(layout);
            NonNull::new(ptr).ok_or_else(|| {
                PoolError::AllocationFailed(format!("Failed to allocate {} bytes", total))
            })?
        };

        Ok(Self {
            base,
            layout,
            slot,
            capacity,
        })
    }

    /// Number of slots in the store.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Per-slot layout.
    pub fn slot_layout(&self) -> SlotLayout {
        self.slot
    }

    /// Total size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.layout.size()
    }

    /// Address of the slot at `index`.
    #[inline]
    pub fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity, "slot index {} out of range", index);
        // SAFETY: index < capacity, so the offset stays inside the buffer.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.slot.stride())) }
    }

    /// Classify an address as a slot of this store, a stray interior
    /// address, or a foreign address.
    #[inline]
    pub fn lookup(&self, addr: usize) -> SlotLookup {
        let base = self.base.as_ptr() as usize;
        if addr < base {
            return SlotLookup::Outside;
        }

        let offset = addr - base;
        if offset >= self.layout.size() {
            return SlotLookup::Outside;
        }

        match self.slot.stride_shift {
            Some(shift) if offset & ((1 << shift) - 1) == 0 => SlotLookup::Inside(offset >> shift),
            Some(_) => SlotLookup::Misaligned,
            None => {
                let stride = self.slot.stride();
                if offset % stride == 0 {
                    SlotLookup::Inside(offset / stride)
                } else {
                    SlotLookup::Misaligned
                }
            }
        }
    }

    /// Check whether `addr` falls anywhere inside the buffer.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        !matches!(self.lookup(addr), SlotLookup::Outside)
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        // Deallocate the backing buffer
        unsafe {
            System.dealloc(self.base.as_ptr(), self.layout);
        }
    }
}
