//! Capacity-Bounded Cache Store
//!
//! Generic key→value store backing every stream's last known value.
//! Supports pluggable eviction (LRU/FIFO/TTL), per-entry TTLs with lazy
//! expiry, tag-based group invalidation, regex invalidation and hit/miss
//! metrics.
//!
//! # Design
//!
//! - Exactly one entry is evicted per insert that would overflow
//!   `max_size`, so the store never exceeds its capacity.
//! - Expired entries are logically absent from `get`/`has` even before a
//!   sweep has physically removed them.
//! - Lookups return a clone of the value; entries never escape the store.
//!
//! There is no global cache registry: callers construct stores explicitly
//! and share them via `Arc`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Configuration
// =============================================================================

/// Eviction strategy used when inserting into a full cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionStrategy {
    /// Evict the least-recently-touched entry.
    #[default]
    Lru,
    /// Evict the oldest-inserted entry.
    Fifo,
    /// Evict the entry with the least remaining lifetime.
    Ttl,
}

impl EvictionStrategy {
    /// Parse a strategy name, defaulting to LRU.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fifo" => Self::Fifo,
            "ttl" => Self::Ttl,
            _ => Self::Lru,
        }
    }

    /// Get the strategy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
            Self::Ttl => "ttl",
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries held at once (0 = unbounded).
    pub max_size: usize,
    /// TTL applied to entries written without an explicit one.
    pub default_ttl: Option<Duration>,
    /// Eviction strategy.
    pub strategy: EvictionStrategy,
    /// Whether hit/miss accounting is recorded.
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1_000,
            default_ttl: None,
            strategy: EvictionStrategy::Lru,
            enable_metrics: true,
        }
    }
}

/// Per-write options for `set` and `get_or_set`.
#[derive(Debug, Clone, Default)]
pub struct CacheWriteOptions {
    /// TTL for this entry; falls back to the store's default TTL.
    pub ttl: Option<Duration>,
    /// Tags the key is registered under for group invalidation.
    pub tags: Vec<String>,
}

impl CacheWriteOptions {
    /// Options with neither TTL nor tags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Register the key under a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

// =============================================================================
// Entries and Metrics
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Option<Duration>,
    access_count: u64,
    last_accessed: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(self.inserted_at) > ttl)
    }

    fn remaining_millis(&self, now: Instant) -> Option<i128> {
        self.ttl.map(|ttl| {
            i128::try_from(ttl.as_millis()).unwrap_or(i128::MAX)
                - i128::try_from(now.duration_since(self.inserted_at).as_millis())
                    .unwrap_or(i128::MAX)
        })
    }
}

/// Snapshot of cache accounting.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheMetrics {
    /// Successful lookups.
    pub hits: u64,
    /// Failed or expired lookups.
    pub misses: u64,
    /// Write operations.
    pub sets: u64,
    /// Explicit removals (delete + invalidations).
    pub deletes: u64,
    /// Capacity evictions.
    pub evictions: u64,
    /// Current number of entries.
    pub size: usize,
    /// hits / (hits + misses); 0 when no lookups happened yet.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct MetricCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

// =============================================================================
// Cache Store
// =============================================================================

#[derive(Debug, Default)]
struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    // Front is the next eviction candidate: LRU moves touched keys to the
    // back, FIFO/TTL leave insertion order untouched.
    order: VecDeque<String>,
    tags: HashMap<String, HashSet<String>>,
}

/// Generic in-memory cache with pluggable eviction.
#[derive(Debug)]
pub struct CacheStore<T> {
    config: CacheConfig,
    inner: Mutex<CacheInner<T>>,
    counters: MetricCounters,
    dispose: CancellationToken,
}

impl<T: Clone> CacheStore<T> {
    /// Create a cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                tags: HashMap::new(),
            }),
            counters: MetricCounters::default(),
            dispose: CancellationToken::new(),
        }
    }

    /// Create a cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// The configuration this store was built with.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a value.
    ///
    /// Returns `None` for absent or expired keys (an expired entry found
    /// here is removed as a side effect). A hit bumps the entry's access
    /// accounting and, under LRU, marks it most recently used.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                drop(inner);
                self.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            Self::remove_locked(&mut inner, key);
            drop(inner);
            self.record_miss();
            return None;
        }

        if self.config.strategy == EvictionStrategy::Lru {
            Self::touch_order_locked(&mut inner, key);
        }

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.last_accessed = now;
            entry.value.clone()
        });
        drop(inner);

        self.record_hit();
        value
    }

    /// Insert or overwrite a value.
    ///
    /// When the key is new and the store is full, exactly one entry is
    /// evicted first according to the configured strategy. Overwrites keep
    /// the key's position in the eviction order but replace its tags, TTL
    /// and access accounting.
    pub fn set(&self, key: impl Into<String>, value: T, options: &CacheWriteOptions) {
        let key = key.into();
        let now = Instant::now();
        let ttl = options.ttl.or(self.config.default_ttl);

        let mut inner = self.inner.lock();

        let is_new = !inner.entries.contains_key(&key);
        if is_new && self.config.max_size > 0 && inner.entries.len() >= self.config.max_size {
            self.evict_one_locked(&mut inner, now);
        }

        if is_new {
            inner.order.push_back(key.clone());
        } else {
            Self::detach_tags_locked(&mut inner, &key);
        }

        for tag in &options.tags {
            inner
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                access_count: 1,
                last_accessed: now,
            },
        );
        drop(inner);

        if self.config.enable_metrics {
            self.counters.sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = Self::remove_locked(&mut inner, key);
        drop(inner);

        if removed && self.config.enable_metrics {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Whether a key is present and unexpired.
    ///
    /// Does not count toward hit/miss accounting; an expired entry found
    /// here is removed as a side effect.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => return false,
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            Self::remove_locked(&mut inner, key);
            return false;
        }
        true
    }

    /// Remove every entry, keeping metrics counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.tags.clear();
    }

    /// Currently stored keys.
    ///
    /// Expiry is lazy: keys whose entries have expired but have not been
    /// swept or re-read are still listed.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Cache-aside lookup: return the cached value if present and
    /// unexpired, otherwise run the async factory, store its result and
    /// return it.
    ///
    /// Concurrent callers racing on the same missing key may each run the
    /// factory; the last write wins. Callers needing single-flight must
    /// coalesce upstream.
    ///
    /// # Errors
    ///
    /// Propagates the factory's error; nothing is stored in that case.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        options: &CacheWriteOptions,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, value.clone(), options);
        Ok(value)
    }

    /// Remove every key registered under `tag`. Returns the removal count.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .tags
            .get(tag)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut removed = 0;
        for key in &keys {
            if Self::remove_locked(&mut inner, key) {
                removed += 1;
            }
        }
        drop(inner);

        if self.config.enable_metrics && removed > 0 {
            self.counters
                .deletes
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every key matching `pattern`. Returns the removal count.
    pub fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();

        let mut removed = 0;
        for key in &keys {
            if Self::remove_locked(&mut inner, key) {
                removed += 1;
            }
        }
        drop(inner);

        if self.config.enable_metrics && removed > 0 {
            self.counters
                .deletes
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Sweep and remove all expired entries. Returns the removal count.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            Self::remove_locked(&mut inner, key);
        }
        expired.len()
    }

    /// Current accounting snapshot.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheMetrics {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: self.len(),
            hit_rate,
        }
    }

    /// Token cancelled when the store is disposed; background sweepers
    /// tie their lifetime to it.
    #[must_use]
    pub fn dispose_token(&self) -> CancellationToken {
        self.dispose.child_token()
    }

    /// Dispose the store: stop any background sweeper and drop all entries.
    pub fn dispose(&self) {
        self.dispose.cancel();
        self.clear();
    }

    // =========================================================================
    // Internals (inner lock held)
    // =========================================================================

    fn evict_one_locked(&self, inner: &mut CacheInner<T>, now: Instant) {
        let victim = match self.config.strategy {
            EvictionStrategy::Lru | EvictionStrategy::Fifo => inner.order.front().cloned(),
            EvictionStrategy::Ttl => inner
                .entries
                .iter()
                .filter_map(|(key, entry)| {
                    entry.remaining_millis(now).map(|rem| (key.clone(), rem))
                })
                .min_by_key(|(_, rem)| *rem)
                .map(|(key, _)| key)
                // No entry carries a TTL: fall back to the oldest insert.
                .or_else(|| inner.order.front().cloned()),
        };

        if let Some(key) = victim {
            Self::remove_locked(inner, &key);
            if self.config.enable_metrics {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            tracing::trace!(key = %key, strategy = self.config.strategy.as_str(), "Evicted cache entry");
        }
    }

    fn remove_locked(inner: &mut CacheInner<T>, key: &str) -> bool {
        if inner.entries.remove(key).is_none() {
            return false;
        }
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        Self::detach_tags_locked(inner, key);
        true
    }

    fn detach_tags_locked(inner: &mut CacheInner<T>, key: &str) {
        inner.tags.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    fn touch_order_locked(inner: &mut CacheInner<T>, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key)
            && let Some(touched) = inner.order.remove(pos)
        {
            inner.order.push_back(touched);
        }
    }

    fn record_hit(&self) {
        if self.config.enable_metrics {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_miss(&self) {
        if self.config.enable_metrics {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
