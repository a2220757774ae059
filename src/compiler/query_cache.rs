/// Compiled query cache
///
/// Caches compiled queries so that a query shape is translated and printed
/// once and then reused across executions with different parameter values.
///
/// # Architecture
///
/// Cache Key: (AST fingerprint, model name and content fingerprint, dialect
/// name and policy fingerprint)
/// Cache Value: `Arc<CompiledQuery>`
///
/// Concurrent requests for the same missing key compile at most once: the
/// first caller holds a per-key slot lock while compiling, later callers wait
/// on that slot and then read the published entry. A failed compilation
/// publishes nothing and retires its slot; callers that were waiting on it
/// start over, and exactly one of them compiles again.
///
/// Invalidating a model bumps its generation. A compilation that started
/// before the bump does not publish its result.
///
/// # Configuration
///
/// Environment variables:
/// - `QUERYFORGE_QUERY_CACHE_ENABLED` (default: true)
/// - `QUERYFORGE_QUERY_CACHE_MAX_ENTRIES` (default: 1000)
/// - `QUERYFORGE_QUERY_CACHE_MAX_SIZE_MB` (default: 100)
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::Model;
use crate::query_ast::QueryExpr;
use crate::sql_generator::DialectPolicy;

use super::CompiledQuery;

/// Key for cache lookup
///
/// The fingerprint is the SHA-256 of the serialized query AST. Query
/// parameter values are not part of the AST, so executions that differ only
/// in parameter values share an entry. The model and dialect are keyed by
/// content as well as by name: a reloaded model or a dialect overlay that
/// keeps its base name never reads SQL printed for a different mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub fingerprint: String,
    pub model_name: String,
    pub model_fingerprint: String,
    pub dialect: String,
    pub dialect_fingerprint: String,
}

impl QueryCacheKey {
    pub fn new(query: &QueryExpr, model: &Model, dialect: &DialectPolicy) -> Result<Self, serde_json::Error> {
        Ok(QueryCacheKey {
            fingerprint: fingerprint(query)?,
            model_name: model.name.clone(),
            model_fingerprint: model.fingerprint().to_string(),
            dialect: dialect.name.clone(),
            dialect_fingerprint: fingerprint(dialect)?,
        })
    }
}

/// Structural fingerprint: hex SHA-256 of the value's JSON form
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Whether a compilation was served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Cache disabled
    Bypass,
}

/// Cached entry with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    compiled: Arc<CompiledQuery>,
    /// Approximate size in bytes for memory tracking
    size_bytes: usize,
    /// Logical access time (for LRU)
    last_accessed: u64,
    /// Number of times this entry was accessed
    access_count: u64,
}

impl CacheEntry {
    fn new(compiled: Arc<CompiledQuery>, now: u64) -> Self {
        let size_bytes = compiled.approximate_size() + std::mem::size_of::<Self>();
        CacheEntry {
            compiled,
            size_bytes,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn touch(&mut self, now: u64) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Configuration for query cache
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Enable or disable caching
    pub enabled: bool,
    /// Maximum number of entries (LRU eviction)
    pub max_entries: usize,
    /// Maximum memory size in bytes
    pub max_size_bytes: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        QueryCacheConfig {
            enabled: true,
            max_entries: 1000,
            max_size_bytes: 100 * 1024 * 1024, // 100 MB
        }
    }
}

impl QueryCacheConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let enabled = std::env::var("QUERYFORGE_QUERY_CACHE_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        let max_entries = std::env::var("QUERYFORGE_QUERY_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let max_size_mb = std::env::var("QUERYFORGE_QUERY_CACHE_MAX_SIZE_MB")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(100);

        QueryCacheConfig {
            enabled,
            max_entries,
            max_size_bytes: max_size_mb * 1024 * 1024,
        }
    }
}

type Slot = Arc<Mutex<()>>;

/// Query cache with LRU eviction and per-key compute-once
pub struct QueryCache {
    cache: Mutex<HashMap<QueryCacheKey, CacheEntry>>,
    /// Keys currently being compiled
    pending: Mutex<HashMap<QueryCacheKey, Slot>>,
    /// Model name -> invalidation count. Locked after `cache` when both are held.
    generations: Mutex<HashMap<String, u64>>,
    config: QueryCacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    compilations: AtomicU64,
}

// A panic while holding a cache lock leaves the maps consistent, so poisoned
// guards are still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        QueryCache {
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(QueryCacheConfig::default())
    }

    pub fn from_env() -> Self {
        Self::new(QueryCacheConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a compiled query from cache
    pub fn get(&self, key: &QueryCacheKey) -> Option<Arc<CompiledQuery>> {
        if !self.config.enabled {
            return None;
        }

        let found = self.lookup(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn lookup(&self, key: &QueryCacheKey) -> Option<Arc<CompiledQuery>> {
        let now = self.tick();
        let mut cache = lock(&self.cache);
        cache.get_mut(key).map(|entry| {
            entry.touch(now);
            entry.compiled.clone()
        })
    }

    /// Insert a compiled query into cache
    ///
    /// May trigger LRU eviction if cache is full
    pub fn insert(&self, key: QueryCacheKey, compiled: Arc<CompiledQuery>) {
        if !self.config.enabled {
            return;
        }

        let entry = CacheEntry::new(compiled, self.tick());
        let mut cache = lock(&self.cache);
        self.store(&mut cache, key, entry);
    }

    fn store(&self, cache: &mut HashMap<QueryCacheKey, CacheEntry>, key: QueryCacheKey, entry: CacheEntry) {
        if !cache.contains_key(&key) && cache.len() >= self.config.max_entries {
            self.evict_lru(cache);
        }

        let current_size: usize = cache
            .iter()
            .filter(|(k, _)| **k != key)
            .map(|(_, e)| e.size_bytes)
            .sum();
        if current_size + entry.size_bytes > self.config.max_size_bytes {
            self.evict_by_size(cache, &key, entry.size_bytes);
        }

        cache.insert(key, entry);
    }

    fn generation(&self, model_name: &str) -> u64 {
        lock(&self.generations).get(model_name).copied().unwrap_or(0)
    }

    /// Publishes a compilation unless its model was invalidated after
    /// `generation` was read
    fn publish(&self, key: &QueryCacheKey, compiled: Arc<CompiledQuery>, generation: u64) {
        let entry = CacheEntry::new(compiled, self.tick());
        let mut cache = lock(&self.cache);
        if self.generation(&key.model_name) != generation {
            log::debug!(
                "Model '{}' was invalidated while compiling {}; result not cached",
                key.model_name,
                key.fingerprint
            );
            return;
        }
        self.store(&mut cache, key.clone(), entry);
    }

    /// Returns the cached entry for `key`, or runs `compile` and caches its
    /// result. Concurrent callers with the same key wait for a single
    /// compilation; an `Err` is returned to its caller and nothing is cached.
    pub fn get_or_compile<E, F>(&self, key: &QueryCacheKey, compile: F) -> Result<(Arc<CompiledQuery>, CacheStatus), E>
    where
        F: FnOnce() -> Result<CompiledQuery, E>,
    {
        if !self.config.enabled {
            self.compilations.fetch_add(1, Ordering::Relaxed);
            return compile().map(|compiled| (Arc::new(compiled), CacheStatus::Bypass));
        }

        loop {
            if let Some(compiled) = self.lookup(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((compiled, CacheStatus::Hit));
            }

            let slot = lock(&self.pending).entry(key.clone()).or_default().clone();
            let _compiling = lock(slot.as_ref());

            // The holder retires the slot before releasing it; a waiter that
            // wakes on a retired slot starts over on the current one
            let current = lock(&self.pending)
                .get(key)
                .is_some_and(|registered| Arc::ptr_eq(registered, &slot));
            if !current {
                continue;
            }

            // Another caller may have published while we waited on the slot
            if let Some(compiled) = self.lookup(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((compiled, CacheStatus::Hit));
            }

            let generation = self.generation(&key.model_name);
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.compilations.fetch_add(1, Ordering::Relaxed);
            let result = compile().map(|compiled| {
                let compiled = Arc::new(compiled);
                self.publish(key, compiled.clone(), generation);
                compiled
            });
            if result.is_err() {
                log::debug!("Compilation failed for {}; slot released for retry", key.fingerprint);
            }

            lock(&self.pending).remove(key);
            return result.map(|compiled| (compiled, CacheStatus::Miss));
        }
    }

    /// Evict least recently used entry
    fn evict_lru(&self, cache: &mut HashMap<QueryCacheKey, CacheEntry>) {
        if let Some(key) = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())
        {
            cache.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Evict entries to make room for `needed_size` bytes, never evicting `keep`
    fn evict_by_size(&self, cache: &mut HashMap<QueryCacheKey, CacheEntry>, keep: &QueryCacheKey, needed_size: usize) {
        let mut current_size: usize = cache
            .iter()
            .filter(|(k, _)| *k != keep)
            .map(|(_, e)| e.size_bytes)
            .sum();

        while current_size + needed_size > self.config.max_size_bytes {
            let Some((key, size)) = cache
                .iter()
                .filter(|(k, _)| *k != keep)
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, e)| (k.clone(), e.size_bytes))
            else {
                break;
            };
            cache.remove(&key);
            current_size -= size;
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Invalidate cache entries compiled against a model
    ///
    /// Called when a model is reloaded to ensure cache consistency.
    /// Compilations for the model still in flight will not publish.
    pub fn invalidate_model(&self, model_name: &str) -> usize {
        let mut cache = lock(&self.cache);
        let before = cache.len();
        cache.retain(|key, _| key.model_name != model_name);
        *lock(&self.generations).entry(model_name.to_string()).or_insert(0) += 1;
        let removed = before - cache.len();
        log::info!("Invalidated {} cached queries for model '{}'", removed, model_name);
        removed
    }

    pub fn clear(&self) {
        lock(&self.cache).clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        let cache = lock(&self.cache);
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            size: cache.len(),
            size_bytes: cache.values().map(|e| e.size_bytes).sum(),
            max_entries: self.config.max_entries,
            max_size_bytes: self.config.max_size_bytes,
        }
    }

    /// (access count, last access) for a cached key
    pub fn entry_stats(&self, key: &QueryCacheKey) -> Option<(u64, u64)> {
        lock(&self.cache)
            .get(key)
            .map(|entry| (entry.access_count, entry.last_accessed))
    }
}

/// Cache metrics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Compilations actually run (misses plus bypasses)
    pub compilations: u64,
    pub size: usize,
    pub size_bytes: usize,
    pub max_entries: usize,
    pub max_size_bytes: usize,
}

impl CacheMetrics {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            0.0
        } else {
            self.size_bytes as f64 / self.max_size_bytes as f64
        }
    }
}
