//! Backing store for window logs and override records.
//!
//! The rate limiter never talks to Redis directly. It goes through the
//! [`WindowStore`] trait, which exposes exactly the ordered-set and key-value
//! primitives the algorithm needs. The store handle is created once at
//! startup by [`connect`] and shared as an `Arc<dyn WindowStore>`.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{RateLimitResult, Result, SlidegateError};

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Ordered-set and key-value primitives with TTL support.
///
/// Every method maps to a single store command. No method is transactional
/// with respect to any other.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Add `member` to the ordered set at `key` with the given score.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> RateLimitResult<()>;

    /// Remove every member scored strictly below `max_exclusive`.
    ///
    /// Returns the number of members removed.
    async fn zrem_below(&self, key: &str, max_exclusive: i64) -> RateLimitResult<u64>;

    /// Number of members in the ordered set at `key`.
    async fn zcard(&self, key: &str) -> RateLimitResult<u64>;

    /// Score of the lowest-ranked member, if any.
    async fn zoldest(&self, key: &str) -> RateLimitResult<Option<i64>>;

    /// Set the time-to-live of `key` in seconds.
    async fn expire(&self, key: &str, seconds: u64) -> RateLimitResult<()>;

    /// Read a string value.
    async fn get(&self, key: &str) -> RateLimitResult<Option<String>>;

    /// Write a string value that expires after `ttl_ms` milliseconds.
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RateLimitResult<()>;

    /// Check that the store is reachable.
    async fn ping(&self) -> RateLimitResult<()>;

    /// Release the underlying connection. Later calls fail.
    async fn close(&self) {}
}

/// Open the store named by `url`.
///
/// `memory://` selects the in-process store and `redis://` the Redis client.
/// Any other scheme is a configuration error.
pub async fn connect(url: &str, timeout: Duration) -> Result<Arc<dyn WindowStore>> {
    if url.starts_with("memory://") {
        info!("Using in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    if !url.starts_with("redis://") {
        return Err(SlidegateError::Config(format!(
            "unsupported store url scheme: {}",
            url
        )));
    }

    let store = RedisStore::connect(url, timeout).await?;
    Ok(Arc::new(store))
}
