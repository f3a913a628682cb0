//! In-memory response cache with per-entry TTL and LRU eviction.
//!
//! Expiry is lazy: an entry past its TTL is dropped the next time it is looked
//! up (or by an explicit [`ResponseCache::clear_expired`] sweep). There is no
//! background task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::{UtcDateTime, ValidationError};

/// Defines the behavior of the in-memory cache for one gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, call upstream and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always call upstream, bypassing any cached entry,
    /// and write the new response to the cache.
    Refresh,
    /// Always call upstream and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }
}

/// Counters reported by [`ResponseCache::stats`].
///
/// Rates are percentages in `[0, 100]` and are `0` before the first lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: UtcDateTime,
    ttl: Duration,
    last_accessed: UtcDateTime,
    access_count: u64,
    sequence: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: UtcDateTime) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    capacity: usize,
    default_ttl: Duration,
    next_sequence: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> CacheInner<V> {
    fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            capacity,
            default_ttl,
            next_sequence: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn get(&mut self, key: &str, now: UtcDateTime) -> Option<V> {
        let expired = match self.map.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses += 1;
                tracing::debug!(key, "cache miss");
                return None;
            }
        };

        if expired {
            self.map.remove(key);
            self.evictions += 1;
            self.misses += 1;
            tracing::debug!(key, "cache entry expired");
            return None;
        }

        let entry = self.map.get_mut(key)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        self.hits += 1;
        tracing::debug!(key, access_count = entry.access_count, "cache hit");
        Some(entry.value.clone())
    }

    fn set(&mut self, key: String, value: V, ttl: Option<Duration>, now: UtcDateTime) {
        if self.capacity == 0 {
            return;
        }

        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            self.evict_least_recently_used();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.map.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                last_accessed: now,
                access_count: 0,
                sequence,
            },
        );
    }

    fn evict_least_recently_used(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, entry)| (entry.last_accessed, entry.sequence))
            .map(|(key, _)| key.clone());

        if let Some(victim) = victim {
            self.map.remove(&victim);
            self.evictions += 1;
            tracing::debug!(key = %victim, "evicted least recently used cache entry");
        }
    }

    fn remove_matching(&mut self, pattern: Option<&Regex>) -> usize {
        let before = self.map.len();
        match pattern {
            Some(pattern) => self.map.retain(|key, _| !pattern.is_match(key)),
            None => self.map.clear(),
        }
        before - self.map.len()
    }

    fn clear_expired(&mut self, now: UtcDateTime) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.map.len();
        self.evictions += removed as u64;
        removed
    }

    fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            let lookups = lookups as f64;
            (
                self.hits as f64 / lookups * 100.0,
                self.misses as f64 / lookups * 100.0,
            )
        };

        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            size: self.map.len(),
            capacity: self.capacity,
            hit_rate,
            miss_rate,
        }
    }
}

/// Thread-safe in-memory cache for upstream responses.
#[derive(Debug, Clone)]
pub struct ResponseCache<V = Value> {
    inner: Arc<Mutex<CacheInner<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send> ResponseCache<V> {
    pub const DEFAULT_CAPACITY: usize = 100;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_clock(capacity, default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::new(capacity, default_ttl))),
            clock,
        }
    }

    /// Create a disabled cache: every `set` is a no-op and every `get` misses.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Get a cached value if present and not past its TTL.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.inner.lock().await.get(key, now)
    }

    /// Insert or replace `key`. `ttl` of `None` uses the cache default.
    ///
    /// When the cache is full and `key` is new, the least recently accessed
    /// entry is evicted first; ties go to the entry inserted earliest.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        self.inner.lock().await.set(key.into(), value, ttl, now);
    }

    /// Remove every key matching a glob pattern (`*` and `?` wildcards), or
    /// every key when `pattern` is `None`. Returns the number removed.
    pub async fn invalidate(&self, pattern: Option<&str>) -> Result<usize, ValidationError> {
        let compiled = pattern.map(glob_to_regex).transpose()?;
        let removed = self.inner.lock().await.remove_matching(compiled.as_ref());
        tracing::debug!(pattern = pattern.unwrap_or("*"), removed, "invalidated cache entries");
        Ok(removed)
    }

    /// Remove expired entries. Returns the number removed.
    pub async fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().await.clear_expired(now)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }

    /// Number of entries, including expired entries not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V: Clone + Send> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_TTL)
    }
}

/// Builds a cache key from request parameters.
///
/// Parameters are sorted by name and percent-encoded, so two requests with
/// the same parameters in a different order map to the same key.
pub fn cache_key<I, K, V>(namespace: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted = params
        .into_iter()
        .map(|(name, value)| (name.as_ref().to_owned(), value.as_ref().to_owned()))
        .collect::<BTreeMap<_, _>>();

    let query = sorted
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    format!("{namespace}?{query}")
}

fn glob_to_regex(pattern: &str) -> Result<Regex, ValidationError> {
    let mut expression = String::with_capacity(pattern.len() + 2);
    expression.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');

    Regex::new(&expression).map_err(|_| ValidationError::InvalidCachePattern {
        pattern: pattern.to_owned(),
    })
}
