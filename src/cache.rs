//! In-memory TTL caches shared by the request handlers.
//!
//! Entries older than the TTL are shadowed on lookup rather than deleted;
//! they are only dropped when a scope reaches its size bound or is
//! explicitly invalidated. The cache is advisory: lock poisoning or key
//! serialization failures turn into misses, never request errors.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Keyed store with a fixed time-to-live.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: chrono::Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    /// `max_entries == 0` leaves the cache unbounded.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
            max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Utc::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if now - entry.stored_at <= self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub(crate) fn set_at(&self, key: impl Into<String>, value: V, now: DateTime<Utc>) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!("cache lock poisoned, skipping write");
            return;
        };
        let key = key.into();

        if self.max_entries > 0
            && !entries.contains_key(&key)
            && entries.len() >= self.max_entries
        {
            let ttl = self.ttl;
            entries.retain(|_, entry| now - entry.stored_at <= ttl);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "evicting oldest cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key, CacheEntry { value, stored_at: now });
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Derives a stable key from a scope name and every request-distinguishing
/// input. Returns `None` when the inputs cannot be serialized, in which case
/// the caller skips the cache.
pub fn cache_key<T: Serialize>(scope: &str, inputs: &T) -> Option<String> {
    // Going through Value sorts object keys, so field order never matters.
    let canonical = serde_json::to_value(inputs)
        .and_then(|v| serde_json::to_string(&v))
        .map_err(|e| warn!(scope, error = %e, "could not derive cache key"))
        .ok()?;

    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// One cache per logical dataset.
pub struct CacheScopes {
    /// Profile/account lookups (follower counts and similar).
    pub account_info: TtlCache<Value>,
    /// Pages reachable from a user token, with their page tokens.
    pub page_lists: TtlCache<Value>,
    /// Post lists for a page/account and date range.
    pub post_lists: TtlCache<Value>,
    /// Fully assembled endpoint payloads.
    pub summaries: TtlCache<Value>,
}

impl CacheScopes {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            account_info: TtlCache::new(ttl, max_entries),
            page_lists: TtlCache::new(ttl, max_entries),
            post_lists: TtlCache::new(ttl, max_entries),
            summaries: TtlCache::new(ttl, max_entries),
        }
    }
}
