//! Read-through cache with refresh-ahead, hard expiry and LRU eviction
//!
//! [`LoadingCache`] is the building block of the rule cache: one instance per
//! lookup kind, each with its own key type and loader.
//!
//! Entry lifecycle, with `age` measured from the last successful load:
//!
//! - `age < refresh`: served from memory
//! - `refresh <= age < expire`: served from memory, and a detached task
//!   reloads the key so the next caller sees a fresh value
//! - `age >= expire`: dropped, the caller loads synchronously as on a miss
//!
//! Loads and refreshes of the same key are serialised through a per-key gate,
//! so concurrent misses result in a single loader call. The table lock is only
//! held for bookkeeping, never across a loader call.
//!
//! Failed loads are never cached. A loader returning `Ok(None)` is passed
//! through to the caller without creating an entry.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::auth::clock::TimeSource;
use crate::config::CacheConfiguration;
use crate::error::CacheError;
use crate::observability::metrics::{self, LoadKind, LookupOutcome};

/// Produces the value for a cache key
///
/// `Ok(None)` means "no value", which the cache returns without storing.
#[async_trait]
pub trait CacheLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> Result<Option<V>, CacheError>;
}

/// Cache statistics for monitoring and debugging
///
/// Counters are monotonic since the cache was built or last reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from memory
    pub hits: u64,
    /// Lookups that had to load
    pub misses: u64,
    /// Successful loader calls on the miss path
    pub loads: u64,
    /// Failed loader calls on the miss path
    pub load_failures: u64,
    /// Successful background reloads
    pub refreshes: u64,
    /// Failed background reloads
    pub refresh_failures: u64,
    /// Entries dropped to stay within `max_entries`
    pub evictions: u64,
    /// Entries dropped because they outlived the expire interval
    pub expired: u64,
    /// Current number of cached entries
    pub entries: u64,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate hit rate from hits and misses
    pub fn calculate_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entries={} hits={} misses={} loads={} load_failures={} refreshes={} refresh_failures={} evictions={} expired={} hit_rate={:.1}%",
            self.entries,
            self.hits,
            self.misses,
            self.loads,
            self.load_failures,
            self.refreshes,
            self.refresh_failures,
            self.evictions,
            self.expired,
            self.hit_rate
        )
    }
}

#[derive(Debug, Default)]
struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
}

impl StatsCounter {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, entries: usize) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries: entries as u64,
            hit_rate: CacheStats::calculate_hit_rate(hits, misses),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.loads,
            &self.load_failures,
            &self.refreshes,
            &self.refresh_failures,
            &self.evictions,
            &self.expired,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Internal cache entry with load time and LRU tracking
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    /// Clock reading of the load that produced `value`
    loaded_at: u64,
    /// Access sequence number, smallest is least recently used
    last_access: u64,
    /// A background reload has been scheduled
    refreshing: bool,
}

#[derive(Debug)]
struct Table<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    sequence: u64,
}

impl<K, V> Table<K, V> {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Absent,
}

/// Claim on a key's load gate
///
/// Dropping the claim, including when the owning future is cancelled, removes
/// the gate from the table once no other caller holds it.
struct Gate<'a, K: Eq + Hash, V> {
    inner: &'a Inner<K, V>,
    key: K,
    lock: Option<Arc<Mutex<()>>>,
}

impl<K: Eq + Hash, V> Gate<'_, K, V> {
    /// Wait until no other load or refresh of the key is running
    async fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl<K: Eq + Hash, V> Drop for Gate<'_, K, V> {
    fn drop(&mut self) {
        let mut gates = self.inner.gates.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.lock.take());
        // Idle once the gate table holds the only reference
        if gates
            .get(&self.key)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            gates.remove(&self.key);
        }
    }
}

struct Inner<K, V> {
    name: &'static str,
    max_entries: usize,
    refresh_after_ms: u64,
    expire_after_ms: u64,
    clock: Arc<dyn TimeSource>,
    loader: Arc<dyn CacheLoader<K, V>>,
    table: Mutex<Table<K, V>>,
    gates: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
    stats: StatsCounter,
}

/// Size and time bounded read-through cache
///
/// Cloning is cheap and every clone shares the same entries.
pub struct LoadingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("name", &self.inner.name)
            .field("max_entries", &self.inner.max_entries)
            .field("refresh_after_ms", &self.inner.refresh_after_ms)
            .field("expire_after_ms", &self.inner.expire_after_ms)
            .finish()
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache named `name` for metrics and logs
    pub fn new(
        name: &'static str,
        config: &CacheConfiguration,
        loader: Arc<dyn CacheLoader<K, V>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                max_entries: config.max_entries,
                refresh_after_ms: config.refresh_interval_ms,
                expire_after_ms: config.expire_interval_ms,
                clock: config.clock(),
                loader,
                table: Mutex::new(Table {
                    entries: HashMap::new(),
                    sequence: 0,
                }),
                gates: StdMutex::new(HashMap::new()),
                stats: StatsCounter::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Return the value for `key`, loading it on a miss
    ///
    /// A stale entry is returned as-is while a detached task reloads it.
    pub async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        match self.inner.lookup(key).await {
            Lookup::Fresh(value) => {
                self.inner.record_lookup(LookupOutcome::Hit);
                Ok(Some(value))
            }
            Lookup::Stale(value) => {
                self.inner.record_lookup(LookupOutcome::Hit);
                let inner = self.inner.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    inner.refresh(key).await;
                });
                Ok(Some(value))
            }
            Lookup::Absent => {
                self.inner.record_lookup(LookupOutcome::Miss);
                self.inner.load(key).await
            }
        }
    }

    /// Remove a single entry
    pub async fn invalidate(&self, key: &K) -> bool {
        self.inner.table.lock().await.entries.remove(key).is_some()
    }

    /// Remove every entry whose key matches `predicate`, returning the count
    pub async fn invalidate_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut table = self.inner.table.lock().await;
        let before = table.entries.len();
        table.entries.retain(|key, _| !predicate(key));
        before - table.entries.len()
    }

    /// Remove every entry
    pub async fn invalidate_all(&self) {
        self.inner.table.lock().await.entries.clear();
    }

    /// Current number of entries
    pub async fn size(&self) -> usize {
        self.inner.table.lock().await.entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.size().await;
        self.inner.stats.snapshot(entries)
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn record_lookup(&self, outcome: LookupOutcome) {
        match outcome {
            LookupOutcome::Hit => StatsCounter::bump(&self.stats.hits),
            LookupOutcome::Miss => StatsCounter::bump(&self.stats.misses),
        }
        metrics::record_lookup(self.name, outcome);
    }

    fn age(&self, now: u64, entry: &CacheEntry<V>) -> u64 {
        now.saturating_sub(entry.loaded_at)
    }

    /// Classify the entry for `key`, dropping it when expired
    async fn lookup(&self, key: &K) -> Lookup<V> {
        let now = self.clock.now_millis();
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let sequence = table.next_sequence();

        let Some(entry) = table.entries.get_mut(key) else {
            return Lookup::Absent;
        };

        let age = now.saturating_sub(entry.loaded_at);
        if age >= self.expire_after_ms {
            table.entries.remove(key);
            StatsCounter::bump(&self.stats.expired);
            debug!(cache = self.name, key = ?key, age_ms = age, "Cache entry expired");
            return Lookup::Absent;
        }

        entry.last_access = sequence;
        if age >= self.refresh_after_ms && !entry.refreshing {
            entry.refreshing = true;
            Lookup::Stale(entry.value.clone())
        } else {
            Lookup::Fresh(entry.value.clone())
        }
    }

    /// Unexpired value for `key`, touching it for LRU
    async fn peek(&self, key: &K) -> Option<V> {
        let now = self.clock.now_millis();
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let sequence = table.next_sequence();

        let entry = table.entries.get_mut(key)?;
        if self.age(now, entry) >= self.expire_after_ms {
            return None;
        }
        entry.last_access = sequence;
        Some(entry.value.clone())
    }

    fn gate(&self, key: &K) -> Gate<'_, K, V> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Gate {
            inner: self,
            key: key.clone(),
            lock: Some(lock),
        }
    }

    async fn fetch(&self, key: &K, kind: LoadKind) -> Result<Option<V>, CacheError> {
        let started = Instant::now();
        let result = self.loader.load(key).await;
        metrics::record_load(self.name, kind, result.is_ok(), started.elapsed());
        result
    }

    /// Miss path: load under the key's gate unless another caller already did
    async fn load(&self, key: &K) -> Result<Option<V>, CacheError> {
        let gate = self.gate(key);
        let _permit = gate.enter().await;
        match self.peek(key).await {
            Some(value) => {
                debug!(cache = self.name, key = ?key, "Value loaded by concurrent caller");
                Ok(Some(value))
            }
            None => self.load_and_store(key).await,
        }
    }

    async fn load_and_store(&self, key: &K) -> Result<Option<V>, CacheError> {
        match self.fetch(key, LoadKind::Load).await {
            Ok(Some(value)) => {
                StatsCounter::bump(&self.stats.loads);
                self.store(key.clone(), value.clone()).await;
                debug!(cache = self.name, key = ?key, "Loaded cache entry");
                Ok(Some(value))
            }
            Ok(None) => {
                StatsCounter::bump(&self.stats.loads);
                debug!(cache = self.name, key = ?key, "Loader returned no value, not caching");
                Ok(None)
            }
            Err(err) => {
                StatsCounter::bump(&self.stats.load_failures);
                debug!(cache = self.name, key = ?key, error = %err, "Cache load failed");
                Err(err)
            }
        }
    }

    /// Background reload of a stale entry
    ///
    /// On failure the current value stays until it expires. A result for an
    /// entry that was evicted or invalidated meanwhile is discarded.
    async fn refresh(&self, key: K) {
        let gate = self.gate(&key);
        let _permit = gate.enter().await;
        match self.fetch(&key, LoadKind::Refresh).await {
            Ok(Some(value)) => {
                StatsCounter::bump(&self.stats.refreshes);
                if self.replace_refreshed(&key, value).await {
                    debug!(cache = self.name, key = ?key, "Refreshed cache entry");
                } else {
                    debug!(cache = self.name, key = ?key, "Entry dropped during refresh, discarding result");
                }
            }
            Ok(None) => {
                StatsCounter::bump(&self.stats.refreshes);
                let mut table = self.table.lock().await;
                if table.entries.get(&key).is_some_and(|entry| entry.refreshing) {
                    table.entries.remove(&key);
                }
                debug!(cache = self.name, key = ?key, "Refresh returned no value, dropped entry");
            }
            Err(err) => {
                StatsCounter::bump(&self.stats.refresh_failures);
                if let Some(entry) = self.table.lock().await.entries.get_mut(&key) {
                    entry.refreshing = false;
                }
                warn!(
                    cache = self.name,
                    key = ?key,
                    error = %err,
                    "Cache refresh failed, keeping current value"
                );
            }
        }
    }

    /// Swap in a refreshed value if the entry is still awaiting it
    async fn replace_refreshed(&self, key: &K, value: V) -> bool {
        let now = self.clock.now_millis();
        let mut table = self.table.lock().await;
        match table.entries.get_mut(key) {
            Some(entry) if entry.refreshing => {
                entry.value = value;
                entry.loaded_at = now;
                entry.refreshing = false;
                true
            }
            _ => false,
        }
    }

    /// Insert or replace an entry, evicting the least recently used on overflow
    async fn store(&self, key: K, value: V) {
        let now = self.clock.now_millis();
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let sequence = table.next_sequence();

        if !table.entries.contains_key(&key) && table.entries.len() >= self.max_entries {
            let victim = table
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            if let Some(victim) = victim {
                table.entries.remove(&victim);
                StatsCounter::bump(&self.stats.evictions);
                metrics::record_eviction(self.name);
                debug!(cache = self.name, key = ?victim, "Evicted least recently used entry");
            }
        }

        table.entries.insert(
            key,
            CacheEntry {
                value,
                loaded_at: now,
                last_access: sequence,
                refreshing: false,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::services::rule_reader::RuleReaderError;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};
    use std::time::Duration;

    /// Loader answering `"<key>-v<version>"`, `None` for keys starting with "none"
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
        version: AtomicU32,
        fail: AtomicBool,
        delay_ms: u64,
    }

    impl CountingLoader {
        fn slow(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn bump_version(&self) {
            self.version.fetch_add(1, Ordering::SeqCst);
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CacheLoader<String, String> for CountingLoader {
        async fn load(&self, key: &String) -> Result<Option<String>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RuleReaderError::Unavailable("backend down".to_string()).into());
            }
            if key.starts_with("none") {
                return Ok(None);
            }
            Ok(Some(format!("{}-v{}", key, self.version.load(Ordering::SeqCst))))
        }
    }

    fn cache_with(
        max_entries: usize,
        refresh_ms: u64,
        expire_ms: u64,
    ) -> (LoadingCache<String, String>, Arc<CountingLoader>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::default());
        let config = CacheConfiguration::new(max_entries, refresh_ms, expire_ms)
            .with_time_source(clock.clone());
        let cache = LoadingCache::new("test", &config, loader.clone());
        (cache, loader, clock)
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    /// Let detached refresh tasks run to completion
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_miss_loads_and_caches() {
        let (cache, loader, _clock) = cache_with(10, 1000, 2000);

        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        assert_eq!(loader.calls(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (cache, loader, _clock) = cache_with(10, 1000, 2000);
        loader.set_failing(true);

        let result = cache.get(&key("a")).await;
        assert!(matches!(result, Err(CacheError::Backend(RuleReaderError::Unavailable(_)))));
        assert_eq!(cache.size().await, 0);

        loader.set_failing(false);
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        assert_eq!(loader.calls(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.load_failures, 1);
        assert_eq!(stats.loads, 1);
    }

    #[tokio::test]
    async fn test_none_is_returned_but_not_cached() {
        let (cache, loader, _clock) = cache_with(10, 1000, 2000);

        assert_eq!(cache.get(&key("none-1")).await.unwrap(), None);
        assert_eq!(cache.get(&key("none-1")).await.unwrap(), None);
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_stale_hit_serves_old_value_and_refreshes() {
        let (cache, loader, clock) = cache_with(10, 1000, 5000);

        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        loader.bump_version();

        clock.advance_millis(1500);
        // Stale but valid: old value, refresh scheduled
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        settle().await;

        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v1".to_string()));
        assert_eq!(loader.calls(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_refreshed_entry_restarts_its_age() {
        let (cache, loader, clock) = cache_with(10, 1000, 2000);

        cache.get(&key("a")).await.unwrap();
        clock.advance_millis(1500);
        cache.get(&key("a")).await.unwrap();
        settle().await;
        assert_eq!(loader.calls(), 2);

        // 1500ms after the refresh: stale again but not expired
        clock.advance_millis(1500);
        assert!(cache.get(&key("a")).await.unwrap().is_some());
        settle().await;
        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.stats().await.expired, 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_value_until_expiry() {
        let (cache, loader, clock) = cache_with(10, 1000, 3000);

        cache.get(&key("a")).await.unwrap();
        loader.set_failing(true);

        clock.advance_millis(1500);
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        settle().await;
        assert_eq!(loader.calls(), 2);

        // Still valid after the failed refresh, and a new refresh is attempted
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        settle().await;
        assert_eq!(loader.calls(), 3);

        let stats = cache.stats().await;
        assert_eq!(stats.refresh_failures, 2);

        clock.advance_millis(2000);
        assert!(cache.get(&key("a")).await.is_err());
        assert_eq!(cache.stats().await.expired, 1);
    }

    #[tokio::test]
    async fn test_single_refresh_in_flight_per_entry() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(50));
        let config = CacheConfiguration::new(10, 1000, 5000).with_time_source(clock.clone());
        let cache = LoadingCache::new("test", &config, loader.clone());

        cache.get(&key("a")).await.unwrap();
        clock.advance_millis(1500);

        for _ in 0..5 {
            assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_reloads_synchronously() {
        let (cache, loader, clock) = cache_with(10, 1000, 2000);

        cache.get(&key("a")).await.unwrap();
        loader.bump_version();
        clock.advance_millis(2000);

        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v1".to_string()));
        assert_eq!(loader.calls(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn test_expire_before_refresh_never_refreshes() {
        let (cache, loader, clock) = cache_with(10, 5000, 1000);

        cache.get(&key("a")).await.unwrap();
        clock.advance_millis(999);
        cache.get(&key("a")).await.unwrap();
        settle().await;
        assert_eq!(loader.calls(), 1);

        clock.advance_millis(1);
        cache.get(&key("a")).await.unwrap();
        settle().await;
        assert_eq!(loader.calls(), 2);
        assert_eq!(cache.stats().await.refreshes, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let (cache, loader, _clock) = cache_with(2, 1000, 2000);

        cache.get(&key("a")).await.unwrap();
        cache.get(&key("b")).await.unwrap();
        // Touch a so that b becomes least recently used
        cache.get(&key("a")).await.unwrap();
        cache.get(&key("c")).await.unwrap();
        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.size().await, 2);

        cache.get(&key("a")).await.unwrap();
        cache.get(&key("c")).await.unwrap();
        assert_eq!(loader.calls(), 3);

        cache.get(&key("b")).await.unwrap();
        assert_eq!(loader.calls(), 4);
        assert_eq!(cache.stats().await.evictions, 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_load_once() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(50));
        let config = CacheConfiguration::new(10, 1000, 5000).with_time_source(clock);
        let cache = LoadingCache::new("test", &config, loader.clone());

        let mut handles = vec![];
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(&key("shared")).await }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value, Some("shared-v0".to_string()));
        }
        assert_eq!(loader.calls(), 1);
        assert!(cache.inner.gates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_keys_load_in_parallel() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(100));
        let config = CacheConfiguration::new(10, 1000, 5000).with_time_source(clock);
        let cache = LoadingCache::new("test", &config, loader.clone());

        let (ka, kb, kc) = (key("a"), key("b"), key("c"));
        let started = std::time::Instant::now();
        let (a, b, c) = tokio::join!(cache.get(&ka), cache.get(&kb), cache.get(&kc));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loader.calls(), 3);
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_cancelled_loads_release_their_gates() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(200));
        let config = CacheConfiguration::new(100, 1000, 5000).with_time_source(clock);
        let cache = LoadingCache::new("test", &config, loader.clone());

        for i in 0..50 {
            let result =
                tokio::time::timeout(Duration::from_millis(10), cache.get(&format!("pw-{i}"))).await;
            assert!(result.is_err());
        }

        assert_eq!(loader.calls(), 50);
        assert!(cache.inner.gates.lock().unwrap().is_empty());
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_keeps_gate_for_active_loader() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(50));
        let config = CacheConfiguration::new(100, 1000, 5000).with_time_source(clock);
        let cache = LoadingCache::new("test", &config, loader.clone());

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(&key("shared")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let waiter = tokio::time::timeout(Duration::from_millis(5), cache.get(&key("shared"))).await;
        assert!(waiter.is_err());
        assert_eq!(cache.inner.gates.lock().unwrap().len(), 1);

        assert_eq!(leader.await.unwrap().unwrap(), Some("shared-v0".to_string()));
        assert!(cache.inner.gates.lock().unwrap().is_empty());
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_of_invalidated_entry_is_discarded() {
        let clock = Arc::new(ManualClock::new());
        let loader = Arc::new(CountingLoader::slow(30));
        let config = CacheConfiguration::new(2, 1000, 5000).with_time_source(clock.clone());
        let cache = LoadingCache::new("test", &config, loader.clone());

        cache.get(&key("a")).await.unwrap();
        cache.get(&key("b")).await.unwrap();
        clock.advance_millis(1500);

        // Stale hit schedules a refresh, then the entry goes away
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some("a-v0".to_string()));
        assert!(cache.invalidate(&key("a")).await);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(loader.calls(), 3);
        assert_eq!(cache.size().await, 1);
        let stats = cache.stats().await;
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_invalidation() {
        let (cache, loader, _clock) = cache_with(10, 1000, 2000);

        for name in ["a", "b", "bb", "c"] {
            cache.get(&key(name)).await.unwrap();
        }
        assert_eq!(cache.size().await, 4);

        assert!(cache.invalidate(&key("a")).await);
        assert!(!cache.invalidate(&key("a")).await);
        assert_eq!(cache.invalidate_where(|k| k.starts_with('b')).await, 2);
        assert_eq!(cache.size().await, 1);

        cache.invalidate_all().await;
        assert_eq!(cache.size().await, 0);

        cache.get(&key("c")).await.unwrap();
        assert_eq!(loader.calls(), 5);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let (cache, _loader, _clock) = cache_with(10, 1000, 2000);
        cache.get(&key("a")).await.unwrap();
        cache.get(&key("a")).await.unwrap();

        cache.reset_stats();
        let stats = cache.stats().await;
        assert_eq!(stats.requests(), 0);
        assert_eq!(stats.loads, 0);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_cache_stats_calculate_hit_rate() {
        assert_eq!(CacheStats::calculate_hit_rate(0, 0), 0.0);
        assert_eq!(CacheStats::calculate_hit_rate(50, 50), 50.0);
        assert_eq!(CacheStats::calculate_hit_rate(80, 20), 80.0);
        assert_eq!(CacheStats::calculate_hit_rate(100, 0), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            entries: 1,
            hit_rate: 75.0,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("hits=3"));
        assert!(text.contains("hit_rate=75.0%"));
    }
}
