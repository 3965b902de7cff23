//! Cache Infrastructure
//!
//! Capacity-bounded key→value store with pluggable eviction and an
//! optional background expiry sweeper.

pub mod store;
pub mod sweeper;

pub use store::{CacheConfig, CacheMetrics, CacheStore, CacheWriteOptions, EvictionStrategy};
pub use sweeper::{CacheSweeper, DEFAULT_SWEEP_INTERVAL};
