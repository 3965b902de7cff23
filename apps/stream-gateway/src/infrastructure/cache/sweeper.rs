//! Background Expiry Sweeper
//!
//! Periodically removes expired entries from a cache store. Only spawned
//! for the TTL strategy; the other strategies rely on lazy expiry at read
//! time plus capacity eviction.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::store::CacheStore;

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Interval task sweeping expired entries out of one cache store.
pub struct CacheSweeper<T> {
    cache: Arc<CacheStore<T>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<T: Clone + Send + Sync + 'static> CacheSweeper<T> {
    /// Create a sweeper tied to the store's dispose token.
    #[must_use]
    pub fn new(cache: Arc<CacheStore<T>>, interval: Duration) -> Self {
        let cancel = cache.dispose_token();
        Self {
            cache,
            interval,
            cancel,
        }
    }

    /// Run the sweep loop until the store is disposed.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Cache sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let swept = self.cache.cleanup();
                    if swept > 0 {
                        tracing::debug!(swept, "Swept expired cache entries");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::{CacheConfig, CacheStore, CacheWriteOptions, EvictionStrategy};
    use super::*;

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(CacheStore::new(CacheConfig {
            max_size: 10,
            default_ttl: None,
            strategy: EvictionStrategy::Ttl,
            enable_metrics: true,
        }));

        cache.set(
            "x",
            1_u32,
            &CacheWriteOptions::new().with_ttl(Duration::from_millis(30)),
        );
        cache.set("keep", 2_u32, &CacheWriteOptions::new());

        let sweeper = CacheSweeper::new(Arc::clone(&cache), Duration::from_millis(20));
        let handle = tokio::spawn(sweeper.run());

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.len(), 1);
        assert!(cache.has("keep"));

        cache.dispose();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }

    #[tokio::test]
    async fn sweeper_stops_on_dispose() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::with_defaults());
        let sweeper = CacheSweeper::new(Arc::clone(&cache), Duration::from_secs(10));

        let handle = tokio::spawn(sweeper.run());
        cache.dispose();

        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok(), "sweeper should shut down on dispose");
    }
}
