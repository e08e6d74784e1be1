//! TTL cache seam for the cache driver
//!
//! The cache driver only ever needs set-with-expiry and get; any
//! backend with those two operations can carry liveness keys.

mod memory;

pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from cache backends
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend did not answer within its deadline
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Any other backend failure
    #[error("Cache operation failed: {0}")]
    Backend(String),
}

/// Expiring key-value backend for liveness keys
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch a live value; expired keys read as absent
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
}
