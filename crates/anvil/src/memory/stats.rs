// File: crates/anvil/src/memory/stats.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Operation counters for a pool.
///
/// Counters are relaxed atomics updated from every participating thread, so
/// they cost a shared cache line per operation; pools built with
/// `track_stats = false` skip them entirely. Contract violations are always
/// counted since they are rare and worth knowing about.
#[derive(Debug)]
pub struct PoolStats {
    enabled: bool,
    /// Creation time of the pool
    creation_time: Instant,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    /// Allocations served straight from a thread cache
    local_hits: AtomicU64,
    /// Batches pulled from the global list
    refills: AtomicU64,
    refilled_slots: AtomicU64,
    /// Batches pushed back to the global list
    spills: AtomicU64,
    spilled_slots: AtomicU64,
    /// Requests that found every free list empty
    exhaustions: AtomicU64,
    overflow_allocations: AtomicU64,
    overflow_releases: AtomicU64,
    contract_violations: AtomicU64,
}

impl PoolStats {
    /// Create a new statistics tracker.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            creation_time: Instant::now(),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            local_hits: AtomicU64::new(0),
            refills: AtomicU64::new(0),
            refilled_slots: AtomicU64::new(0),
            spills: AtomicU64::new(0),
            spilled_slots: AtomicU64::new(0),
            exhaustions: AtomicU64::new(0),
            overflow_allocations: AtomicU64::new(0),
            overflow_releases: AtomicU64::new(0),
            contract_violations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.enabled {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }

    /// Record a successful allocation from the backing store.
    #[inline]
    pub fn record_allocation(&self, local_hit: bool) {
        self.bump(&self.allocations, 1);
        if local_hit {
            self.bump(&self.local_hits, 1);
        }
    }

    #[inline]
    pub fn record_deallocation(&self) {
        self.bump(&self.deallocations, 1);
    }

    pub fn record_refill(&self, slots: usize) {
        self.bump(&self.refills, 1);
        self.bump(&self.refilled_slots, slots as u64);
    }

    pub fn record_spill(&self, slots: usize) {
        self.bump(&self.spills, 1);
        self.bump(&self.spilled_slots, slots as u64);
    }

    pub fn record_exhaustion(&self) {
        self.bump(&self.exhaustions, 1);
    }

    pub fn record_overflow_allocation(&self) {
        self.bump(&self.overflow_allocations, 1);
    }

    pub fn record_overflow_release(&self) {
        self.bump(&self.overflow_releases, 1);
    }

    pub fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of every counter.
    ///
    /// Counters are read one by one, so a snapshot taken under load is not
    /// a consistent cut.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        StatsSnapshot {
            enabled: self.enabled,
            uptime_secs: self.creation_time.elapsed().as_secs_f64(),
            allocations: load(&self.allocations),
            deallocations: load(&self.deallocations),
            local_hits: load(&self.local_hits),
            refills: load(&self.refills),
            refilled_slots: load(&self.refilled_slots),
            spills: load(&self.spills),
            spilled_slots: load(&self.spilled_slots),
            exhaustions: load(&self.exhaustions),
            overflow_allocations: load(&self.overflow_allocations),
            overflow_releases: load(&self.overflow_releases),
            contract_violations: load(&self.contract_violations),
        }
    }
}

/// Copy of a pool's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub enabled: bool,
    pub uptime_secs: f64,
    pub allocations: u64,
    pub deallocations: u64,
    pub local_hits: u64,
    pub refills: u64,
    pub refilled_slots: u64,
    pub spills: u64,
    pub spilled_slots: u64,
    pub exhaustions: u64,
    pub overflow_allocations: u64,
    pub overflow_releases: u64,
    pub contract_violations: u64,
}

impl StatsSnapshot {
    /// Fraction of backing-store allocations served without touching the
    /// global list (0.0 to 1.0).
    pub fn local_hit_rate(&self) -> f64 {
        if self.allocations == 0 {
            0.0
        } else {
            self.local_hits as f64 / self.allocations as f64
        }
    }

    /// Get the allocation rate (allocations per second).
    pub fn allocation_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            (self.allocations + self.overflow_allocations) as f64 / self.uptime_secs
        } else {
            0.0
        }
    }

    /// Format the counters as a human-readable string.
    pub fn format_summary(&self) -> String {
        format!(
            "Pool Statistics:\n\
             - Allocations: {} ({:.1}% from thread cache)\n\
             - Deallocations: {}\n\
             - Refills: {} ({} slots)\n\
             - Spills: {} ({} slots)\n\
             - Exhaustions: {}\n\
             - Heap overflow: {} allocated, {} released\n\
             - Contract violations: {}",
            self.allocations,
            self.local_hit_rate() * 100.0,
            self.deallocations,
            self.refills,
            self.refilled_slots,
            self.spills,
            self.spilled_slots,
            self.exhaustions,
            self.overflow_allocations,
            self.overflow_releases,
            self.contract_violations
        )
    }
}
