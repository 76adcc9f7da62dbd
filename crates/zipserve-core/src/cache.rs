//! In-memory archive cache with absolute expiration.
//!
//! Entries are keyed by the sorted set of resolved paths and expire a fixed
//! time after they were stored. Expired entries are dropped lazily, on the
//! next lookup that finds them; there is no background sweep.
//!
//! Two requests that miss on the same key at the same time will both build and
//! both store; the last `put` wins.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::resolver::ResolvedPath;

/// Separator between paths in a cache key. Paths cannot contain NUL.
const KEY_SEPARATOR: char = '\0';

/// Cache key derived from a set of resolved paths.
///
/// The paths are sorted before they are joined, so the same set requested in
/// any order maps to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for a path set. Input order does not matter.
    pub fn from_paths(paths: &[ResolvedPath]) -> Self {
        let mut sorted: Vec<&ResolvedPath> = paths.iter().collect();
        sorted.sort();
        Self::from_sorted(sorted)
    }

    /// Build the key for a path list that is already sorted.
    pub(crate) fn from_sorted<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a ResolvedPath>,
    {
        let mut key = String::new();
        for (i, path) in paths.into_iter().enumerate() {
            if i > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&path.as_path().to_string_lossy());
        }
        Self(key)
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A cached archive with its expiration time.
#[derive(Debug, Clone)]
struct CacheEntry {
    bytes: Bytes,
    expires_at: Instant,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned an archive.
    pub hits: u64,
    /// Lookups that found nothing usable, expired entries included.
    pub misses: u64,
    /// Entries dropped because they had expired.
    pub expired: u64,
    /// Entries currently held, expired ones not yet dropped included.
    pub entries: usize,
}

/// Thread-safe expiring store of built archives.
///
/// Callers never lock; all synchronisation is internal.
#[derive(Debug, Default)]
pub struct ArchiveCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl ArchiveCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an archive. Expired entries are never returned.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Bytes> {
        let found = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(key).map(|entry| (now <= entry.expires_at, entry.bytes.clone()))
        };

        match found {
            Some((true, bytes)) => {
                self.record(|stats| stats.hits += 1);
                Some(bytes)
            }
            Some((false, _)) => {
                self.evict_if_expired(key, now);
                self.record(|stats| stats.misses += 1);
                None
            }
            None => {
                self.record(|stats| stats.misses += 1);
                None
            }
        }
    }

    /// Store an archive, replacing any entry for the same key.
    ///
    /// The entry expires `ttl` after this call.
    pub fn put(&self, key: CacheKey, bytes: Bytes, ttl: Duration) {
        self.put_at(key, bytes, ttl, Instant::now());
    }

    pub(crate) fn put_at(&self, key: CacheKey, bytes: Bytes, ttl: Duration, now: Instant) {
        let size = bytes.len();
        let expires_at = now + ttl;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, CacheEntry { bytes, expires_at });
        debug!(size, ttl_secs = ttl.as_secs(), entries = entries.len(), "Archive cached");
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    /// Number of entries held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().unwrap_or_else(PoisonError::into_inner).clone();
        stats.entries = self.len();
        stats
    }

    fn evict_if_expired(&self, key: &CacheKey, now: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent put may have refreshed the entry since the read.
        if entries.get(key).is_some_and(|entry| now > entry.expires_at) {
            entries.remove(key);
            drop(entries);
            self.record(|stats| stats.expired += 1);
            debug!(key_len = key.as_str().len(), "Expired archive evicted");
        }
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }
}
