//! Pool configuration

use serde::{Deserialize, Serialize};

use crate::memory::free_list::NIL;
use crate::memory::overflow::OverflowMode;
use crate::memory::pool::PoolError;
use crate::memory::store::CACHE_LINE_SIZE;

/// Upper bound for the derived spill high-water mark.
const MAX_DEFAULT_HIGH_WATER: usize = 256;

/// Largest capacity a pool can index; `u32::MAX` is reserved as the list terminator.
pub const MAX_CAPACITY: usize = NIL as usize - 1;

/// Configuration for a [`FixedPool`](crate::FixedPool).
///
/// Every knob is fixed at construction. Deserializing from any serde format
/// is supported; missing fields are not, so start from [`PoolConfig::new`]
/// when building one in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of slots in the backing store
    pub capacity: usize,
    /// Minimum slot alignment (power of two)
    pub alignment: usize,
    /// Thread cache length that triggers a spill to the global list.
    /// Zero keeps nothing locally: every deallocate spills.
    pub spill_high_water: usize,
    /// Slots pulled from the global list when a thread cache runs dry.
    /// At most `max(spill_high_water, 1)`.
    pub refill_batch: usize,
    /// Behaviour once every free list is empty
    pub overflow: OverflowMode,
    /// Spin with exponential backoff between CAS retries
    pub use_backoff: bool,
    /// Enable operation counters
    pub track_stats: bool,
}

impl PoolConfig {
    /// Defaults derived from the capacity and the machine.
    ///
    /// The high-water mark gives every CPU's thread cache about half of an
    /// even share of the pool. Pools smaller than two slots per CPU get a
    /// mark of zero, so freed slots always return to the global list.
    ///
    /// # Examples
    /// ```
    /// # use anvil::{OverflowMode, PoolConfig, CACHE_LINE_SIZE};
    /// let config = PoolConfig::new(1024);
    /// assert_eq!(config.alignment, CACHE_LINE_SIZE);
    /// assert_eq!(config.overflow, OverflowMode::Bounded);
    /// assert!(config.spill_high_water <= 256);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let cpus = num_cpus::get().max(1);
        let spill_high_water = (capacity / (2 * cpus)).min(MAX_DEFAULT_HIGH_WATER);

        Self {
            capacity,
            alignment: CACHE_LINE_SIZE,
            spill_high_water,
            refill_batch: (spill_high_water / 2).max(1),
            overflow: OverflowMode::Bounded,
            use_backoff: true,
            track_stats: cfg!(debug_assertions),
        }
    }

    /// Production configuration for latency-critical callers: bounded, no
    /// counters, no backoff.
    #[must_use]
    pub fn low_latency(capacity: usize) -> Self {
        Self {
            overflow: OverflowMode::Bounded,
            use_backoff: false,
            track_stats: false,
            ..Self::new(capacity)
        }
    }

    /// Configuration that falls back to the heap instead of failing.
    #[must_use]
    pub fn elastic(capacity: usize) -> Self {
        Self {
            overflow: OverflowMode::HeapOverflow,
            ..Self::new(capacity)
        }
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_spill_high_water(mut self, spill_high_water: usize) -> Self {
        self.spill_high_water = spill_high_water;
        self
    }

    #[must_use]
    pub fn with_refill_batch(mut self, refill_batch: usize) -> Self {
        self.refill_batch = refill_batch;
        self
    }

    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowMode) -> Self {
        self.overflow = overflow;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, use_backoff: bool) -> Self {
        self.use_backoff = use_backoff;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, track_stats: bool) -> Self {
        self.track_stats = track_stats;
        self
    }

    /// Check every knob before any memory is reserved.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(PoolError::InvalidCapacity {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }

        if !self.alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment {
                alignment: self.alignment,
            });
        }

        if self.refill_batch == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "refill_batch must be at least 1".to_string(),
            });
        }

        // A larger batch would spill straight back after one deallocate.
        let max_batch = self.spill_high_water.max(1);
        if self.refill_batch > max_batch {
            return Err(PoolError::InvalidConfig {
                reason: format!(
                    "refill_batch {} exceeds the spill high-water mark ({} allowed)",
                    self.refill_batch, max_batch
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_scale_with_capacity() {
        let small = PoolConfig::new(4);
        assert!(small.spill_high_water <= 2);
        assert_eq!(small.refill_batch, 1);
        assert!(small.validate().is_ok());

        let cpus = num_cpus::get();
        let tiny = PoolConfig::new(2 * cpus - 1);
        assert_eq!(tiny.spill_high_water, 0);
        assert_eq!(tiny.refill_batch, 1);
        assert!(tiny.validate().is_ok());

        let huge = PoolConfig::new(10_000_000);
        assert_eq!(huge.spill_high_water, MAX_DEFAULT_HIGH_WATER);
        assert_eq!(huge.refill_batch, MAX_DEFAULT_HIGH_WATER / 2);
    }

    #[test]
    fn test_presets() {
        let fast = PoolConfig::low_latency(64);
        assert_eq!(fast.overflow, OverflowMode::Bounded);
        assert!(!fast.use_backoff);
        assert!(!fast.track_stats);

        let elastic = PoolConfig::elastic(64);
        assert_eq!(elastic.overflow, OverflowMode::HeapOverflow);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            PoolConfig::new(0).validate(),
            Err(PoolError::InvalidCapacity { capacity: 0, .. })
        ));
        assert!(matches!(
            PoolConfig::new(8).with_alignment(24).validate(),
            Err(PoolError::InvalidAlignment { alignment: 24 })
        ));
        assert!(matches!(
            PoolConfig::new(8).with_refill_batch(0).validate(),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_zero_high_water_is_valid() {
        let config = PoolConfig::new(8)
            .with_spill_high_water(0)
            .with_refill_batch(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_refill_batch_bounded_by_high_water() {
        let base = PoolConfig::new(64);
        assert!(base.clone().with_spill_high_water(8).with_refill_batch(8).validate().is_ok());
        assert!(matches!(
            base.clone().with_spill_high_water(8).with_refill_batch(9).validate(),
            Err(PoolError::InvalidConfig { .. })
        ));
        assert!(matches!(
            base.with_spill_high_water(0).with_refill_batch(2).validate(),
            Err(PoolError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "capacity": 512,
            "alignment": 64,
            "spill_high_water": 32,
            "refill_batch": 8,
            "overflow": "heap_overflow",
            "use_backoff": false,
            "track_stats": true
        }"#;

        let config: PoolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.capacity, 512);
        assert_eq!(config.overflow, OverflowMode::HeapOverflow);
        assert!(config.validate().is_ok());

        let back = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<PoolConfig>(&back).unwrap(), config);
    }
}
