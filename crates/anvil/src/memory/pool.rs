use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crossbeam_utils::CachePadded;
use thread_local::ThreadLocal;
use tracing::{debug, error, trace, warn};

use crate::memory::config::PoolConfig;
use crate::memory::free_list::GlobalFreeList;
use crate::memory::local::{LocalList, ThreadCache};
use crate::memory::overflow::{OverflowMode, OverflowPolicy};
#[cfg(debug_assertions)]
use crate::memory::state::SlotStates;
use crate::memory::stats::{PoolStats, StatsSnapshot};
use crate::memory::store::{BackingStore, SlotLayout, SlotLookup};

/// Errors that can occur during memory pool operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("Pool exhausted: all {capacity} slots are in use")]
    Exhausted { capacity: usize },

    #[error("Invalid capacity: {capacity} (must be between 1 and {max})")]
    InvalidCapacity { capacity: usize, max: usize },

    #[error("Invalid alignment: {alignment} is not a power of 2")]
    InvalidAlignment { alignment: usize },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Overflow allocation failed: {size} bytes with {align} byte alignment")]
    OverflowAllocationFailed { size: usize, align: usize },
}

impl PoolError {
    /// Check whether this is the ordinary "no capacity left" outcome of a
    /// bounded pool rather than a failure.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

type LocalCell = CachePadded<UnsafeCell<LocalList>>;

/// Lock-free pool of fixed-size, cache-line aligned slots for one element type.
///
/// The pool only manages storage: [`allocate`](Self::allocate) returns
/// uninitialized memory for one `T` and [`deallocate`](Self::deallocate)
/// takes it back. Constructing and dropping the value in between is the
/// caller's job.
///
/// Each pool owns its thread caches, keyed by thread, so two pools of the
/// same element type never share state.
///
/// # Examples
/// ```
/// # use anvil::FixedPool;
/// let pool = FixedPool::<u64>::new(4).unwrap();
///
/// let slot = pool.allocate().unwrap();
/// unsafe {
///     slot.as_ptr().write(42);
///     assert_eq!(*slot.as_ptr(), 42);
///     pool.deallocate(slot);
/// }
///
/// // The slot just freed is the next one handed out on this thread.
/// assert_eq!(pool.allocate().unwrap(), slot);
/// ```
pub struct FixedPool<T> {
    /// Shared reservoir of free slots
    free: GlobalFreeList,
    /// Slot storage
    store: BackingStore,
    /// Per-thread free-list segments of this pool
    caches: ThreadLocal<LocalCell>,
    /// Behaviour once every free list is empty
    overflow: OverflowPolicy,
    /// Statistics tracking
    stats: CachePadded<PoolStats>,
    /// Ownership tag per slot
    #[cfg(debug_assertions)]
    states: SlotStates,
    config: PoolConfig,
    _marker: PhantomData<T>,
}

impl<T> FixedPool<T> {
    /// Create a pool of `capacity` slots with default configuration.
    ///
    /// # Returns
    /// * `Ok(FixedPool)` - Every slot is free
    /// * `Err(PoolError)` - Invalid capacity or the backing store could not be reserved
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::new(capacity))
    }

    /// Create a pool from an explicit configuration.
    ///
    /// # Examples
    /// ```
    /// # use anvil::{FixedPool, PoolConfig};
    /// let config = PoolConfig::elastic(16).with_alignment(64);
    /// let pool = FixedPool::<[u8; 40]>::with_config(config).unwrap();
    /// assert_eq!(pool.slot_size(), 64);
    /// ```
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let slot = SlotLayout::for_type::<T>(config.alignment)?;
        let store = BackingStore::new(slot, config.capacity)?;
        let free = GlobalFreeList::new(config.capacity, config.use_backoff);

        debug!(
            capacity = config.capacity,
            slot_size = slot.stride(),
            alignment = slot.align(),
            overflow = ?config.overflow,
            spill_high_water = config.spill_high_water,
            refill_batch = config.refill_batch,
            "Created fixed pool"
        );

        Ok(Self {
            free,
            store,
            caches: ThreadLocal::new(),
            overflow: OverflowPolicy::new(config.overflow, slot.layout()),
            stats: CachePadded::new(PoolStats::new(config.track_stats)),
            #[cfg(debug_assertions)]
            states: SlotStates::new(config.capacity),
            config,
            _marker: PhantomData,
        })
    }

    /// Allocate uninitialized storage for one `T`.
    ///
    /// Tries the calling thread's cache, then a batch from the global list,
    /// then the overflow policy. In bounded mode an empty pool yields
    /// [`PoolError::Exhausted`].
    pub fn allocate(&self) -> Result<NonNull<T>, PoolError> {
        let cell = self.local_cell();
        // SAFETY: a registry entry is only reached through `get_or` on its
        // own thread, and the borrow ends before this call returns.
        let list = unsafe { &mut *cell.get() };
        self.allocate_with(list)
    }

    /// Return storage obtained from [`allocate`](Self::allocate).
    ///
    /// Any value at `ptr` must already have been dropped. Backing-store slots
    /// go to the calling thread's cache, spilling to the global list past the
    /// high-water mark; heap overflow slots go back to the heap.
    ///
    /// Pointers that cannot belong to the pool are logged and rejected
    /// rather than linked into a free list. Debug builds also catch double
    /// frees, and panic on any rejected pointer.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this pool (directly or through a
    /// [`ThreadCache`]) and must not have been deallocated since.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>) {
        let cell = self.local_cell();
        // SAFETY: see `allocate`.
        let list = &mut *cell.get();
        self.release_with(list, ptr);
    }

    /// Register an explicit cache handle for the calling code.
    ///
    /// The handle is independent of the implicit per-thread cache and
    /// returns its slots to the global list when dropped.
    pub fn cache(&self) -> ThreadCache<'_, T> {
        ThreadCache::new(self)
    }

    /// Move every slot parked in the per-thread registry back to the global
    /// list. Returns the number of slots moved.
    ///
    /// Exclusive access guarantees no thread is using its cache meanwhile;
    /// this recovers slots left behind by threads that have exited.
    pub fn reclaim_thread_caches(&mut self) -> usize {
        let free = &self.free;
        let moved: usize = self
            .caches
            .iter_mut()
            .map(|cell| cell.get_mut().spill_into(free, 0))
            .sum();

        if moved > 0 {
            debug!(moved, "Reclaimed slots from thread caches");
        }
        moved
    }

    /// Slots currently on the global free list.
    pub fn global_free_slots(&mut self) -> usize {
        self.free.count()
    }

    /// Slots currently parked in the per-thread registry.
    pub fn cached_slots(&mut self) -> usize {
        self.caches.iter_mut().map(|cell| cell.get_mut().len()).sum()
    }

    /// Heap overflow slots currently handed out.
    pub fn live_overflow_slots(&self) -> usize {
        self.overflow.live()
    }

    /// Number of slots in the backing store.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Alignment of every slot.
    pub fn alignment(&self) -> usize {
        self.store.slot_layout().align()
    }

    /// Bytes reserved per slot (the stride between slots).
    pub fn slot_size(&self) -> usize {
        self.store.slot_layout().stride()
    }

    pub fn overflow_mode(&self) -> OverflowMode {
        self.overflow.mode()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check whether `ptr` is a slot of the backing store.
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        matches!(
            self.store.lookup(ptr.as_ptr() as usize),
            SlotLookup::Inside(_)
        )
    }

    /// Get pool statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[inline]
    fn local_cell(&self) -> &UnsafeCell<LocalList> {
        self.caches
            .get_or(|| CachePadded::new(UnsafeCell::new(LocalList::new())))
    }

    pub(crate) fn allocate_with(&self, list: &mut LocalList) -> Result<NonNull<T>, PoolError> {
        let links = self.free.links();

        if let Some(index) = list.pop(links) {
            self.stats.record_allocation(true);
            return Ok(self.issue(index));
        }

        let refilled = list.refill_from(&self.free, self.config.refill_batch);
        if refilled > 0 {
            trace!(slots = refilled, "Refilled thread cache");
            self.stats.record_refill(refilled);
            if let Some(index) = list.pop(links) {
                self.stats.record_allocation(false);
                return Ok(self.issue(index));
            }
        }

        self.stats.record_exhaustion();
        let ptr = self.overflow.on_exhausted(self.config.capacity)?;
        self.stats.record_overflow_allocation();
        Ok(ptr.cast())
    }

    pub(crate) unsafe fn release_with(&self, list: &mut LocalList, ptr: NonNull<T>) {
        match self.store.lookup(ptr.as_ptr() as usize) {
            SlotLookup::Inside(index) => {
                let index = index as u32;

                #[cfg(debug_assertions)]
                {
                    if !self.states.mark_free(index) {
                        self.reject(ptr, "slot is not allocated (double free?)");
                        return;
                    }
                }

                self.stats.record_deallocation();
                list.push(index, self.free.links());

                if list.len() > self.config.spill_high_water {
                    let spilled = list.spill_into(&self.free, self.config.spill_high_water / 2);
                    trace!(slots = spilled, "Spilled thread cache to global free list");
                    self.stats.record_spill(spilled);
                }
            }
            SlotLookup::Outside => {
                if self.overflow.release(ptr.cast()) {
                    self.stats.record_overflow_release();
                } else {
                    self.reject(ptr, "pointer does not belong to this pool");
                }
            }
            SlotLookup::Misaligned => {
                self.reject(ptr, "pointer is not at a slot boundary");
            }
        }
    }

    pub(crate) fn flush_list(&self, list: &mut LocalList) -> usize {
        list.spill_into(&self.free, 0)
    }

    #[inline]
    fn issue(&self, index: u32) -> NonNull<T> {
        #[cfg(debug_assertions)]
        self.states.mark_allocated(index);

        self.store.slot_ptr(index as usize).cast()
    }

    #[cold]
    fn reject(&self, ptr: NonNull<T>, reason: &str) {
        self.stats.record_contract_violation();
        error!(address = ?ptr.as_ptr(), reason, "Rejected deallocation");

        if cfg!(debug_assertions) {
            panic!("invalid deallocation of {:p}: {}", ptr.as_ptr(), reason);
        }
    }
}

impl<T> Drop for FixedPool<T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let outstanding = self.states.allocated();
            if outstanding > 0 {
                warn!(outstanding, "Pool dropped while slots are still allocated");
            }
        }

        let foreign = self.overflow.live();
        if foreign > 0 {
            warn!(foreign, "Pool dropped with live heap overflow slots; they are leaked");
        }

        debug!(capacity = self.config.capacity, "Dropped fixed pool");
    }
}

// Safety: the pool never reads or drops a `T`; it hands out raw storage whose
// ownership moves with the caller. Shared state is atomics or per-thread.
unsafe impl<T: Send> Send for FixedPool<T> {}
unsafe impl<T: Send> Sync for FixedPool<T> {}
