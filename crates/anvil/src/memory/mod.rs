//! Lock-free fixed-capacity slot pool.
//!
//! Leaves first: the backing store holds the slots, the global free list is
//! a tagged Treiber stack over their indices, thread caches sit on top of
//! it, and the overflow policy decides what happens once both run dry.

pub mod config;
pub mod free_list;
pub mod local;
pub mod overflow;
pub mod pool;
#[cfg(debug_assertions)]
mod state;
pub mod stats;
pub mod store;

pub use config::PoolConfig;
pub use local::ThreadCache;
pub use overflow::OverflowMode;
pub use pool::{FixedPool, PoolError};
pub use stats::StatsSnapshot;
pub use store::CACHE_LINE_SIZE;
