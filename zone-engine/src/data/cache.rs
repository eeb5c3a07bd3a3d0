//! Typed in-memory cache with optional per-entry TTL.
//!
//! One `TtlCache` exists per value type (scan results, margins, strategies,
//! mitigation results, candle history), so reads never need a runtime cast.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Cache entry with optional expiry
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            // An unrepresentable deadline is as good as never expiring
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// String-keyed, internally synchronised cache.
///
/// Every operation takes the lock for its own duration only; a `get`
/// followed by a `set` is two independent operations.
#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    default_ttl: Option<Duration>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose `set` uses `default_ttl`.
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            default_ttl: Some(default_ttl),
        }
    }

    /// Create a cache whose entries never expire.
    pub fn unbounded(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            default_ttl: None,
        }
    }

    /// Cache name (for logging)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get a value if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().ok()?;

        entries.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.value.clone())
            }
        })
    }

    /// Store a value with the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with an explicit TTL (`None` = never expires).
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl);

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), entry);
        }
    }

    /// Remove a key, returning the stored value if it was live.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write().ok()?;
        entries
            .remove(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value)
    }

    /// Flush the cache and repopulate it in one step.
    ///
    /// Readers observe either the previous snapshot or the new one, never a
    /// partially flushed map.
    pub fn replace_all<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let fresh: HashMap<String, CacheEntry<V>> = items
            .into_iter()
            .map(|(key, value)| (key, CacheEntry::new(value, self.default_ttl)))
            .collect();
        let count = fresh.len();

        if let Ok(mut entries) = self.entries.write() {
            *entries = fresh;
        }

        tracing::debug!(cache = self.name, count, "Cache replaced");
        count
    }

    /// All live values, in no particular order.
    pub fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| !e.is_expired())
                    .map(|e| e.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed.
    pub fn clear_expired(&self) -> usize {
        match self.entries.write() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired());
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = self
            .entries
            .read()
            .map(|e| (e.len(), e.values().filter(|v| v.is_expired()).count()))
            .unwrap_or((0, 0));

        CacheStats {
            name: self.name,
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

// ============================================================================
// Tests
// ============================================================================
