//! In-process TTL cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheBackend, CacheError};

/// Entry with its expiry instant
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Cache backed by a process-local map with per-key TTLs.
///
/// Runs on the tokio clock so expiry behaves under a paused test
/// runtime. Expired entries are dropped on read; `cleanup_expired`
/// sweeps the rest.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit and miss counters
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Number of entries, including not-yet-swept expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| now >= entry.expires_at)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in &expired {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired cache entries");
        }
        removed
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            // Expired
            drop(entry);
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}
