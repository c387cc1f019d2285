//! # Anvil - Lock-Free Fixed-Capacity Object Pool
//!
//! Anvil hands out and reclaims storage for exactly one element type without
//! taking locks. All storage is reserved up front, so allocation latency is
//! bounded and never touches the general heap unless a pool is explicitly
//! configured to overflow into it.
//!
//! ## Core Features
//!
//! - **Cache-line aligned slots**: no false sharing between neighbouring slots
//! - **Lock-free global free list**: tagged Treiber stack, immune to ABA
//! - **Per-thread caches**: owned by each pool, with spill/refill batching
//! - **Explicit overflow policy**: bounded or heap overflow, chosen once
//!
//! The pool manages storage only. Constructing and dropping the value in a
//! slot is the caller's responsibility.
//!
//! ## Quick Start
//!
//! ```rust
//! use anvil::{FixedPool, PoolConfig};
//!
//! struct Order {
//!     id: u64,
//!     price: f64,
//!     quantity: i32,
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a pool with room for 1024 orders
//! let pool = FixedPool::<Order>::with_config(PoolConfig::low_latency(1024))?;
//!
//! // Allocate raw storage and construct in place
//! let slot = pool.allocate()?;
//! unsafe {
//!     slot.as_ptr().write(Order { id: 1001, price: 99.95, quantity: 200 });
//!
//!     let order = &*slot.as_ptr();
//!     println!("Order {}: {} @ {}", order.id, order.quantity, order.price);
//!
//!     // Drop the value, then hand the storage back
//!     std::ptr::drop_in_place(slot.as_ptr());
//!     pool.deallocate(slot);
//! }
//! # Ok(())
//! # }
//! ```

pub mod memory;

// Re-export commonly used types for convenience
pub use memory::config::PoolConfig;
pub use memory::local::ThreadCache;
pub use memory::overflow::OverflowMode;
pub use memory::pool::{FixedPool, PoolError};
pub use memory::stats::StatsSnapshot;
pub use memory::store::CACHE_LINE_SIZE;

/// Version information for the anvil crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_cache_line_size_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(CACHE_LINE_SIZE >= 64);
    }
}
