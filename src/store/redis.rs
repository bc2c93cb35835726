//! Redis implementation of the window store.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::WindowStore;
use crate::error::{RateLimitError, RateLimitResult, Result, SlidegateError};

/// A Redis-backed store sharing one multiplexed connection across requests.
pub struct RedisStore {
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connect to Redis, failing if the connection is not up within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SlidegateError::Store(format!("Failed to create Redis client: {}", e)))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                SlidegateError::Store(format!("Timed out connecting to Redis after {:?}", timeout))
            })?
            .map_err(|e| SlidegateError::Store(format!("Failed to connect to Redis: {}", e)))?;

        info!("Redis is connected");

        Ok(Self {
            conn: RwLock::new(Some(conn)),
        })
    }

    fn connection(&self) -> RateLimitResult<MultiplexedConnection> {
        self.conn
            .read()
            .clone()
            .ok_or_else(|| RateLimitError::StoreUnavailable("connection closed".to_string()))
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn zadd(&self, key: &str, score: i64, member: &str) -> RateLimitResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrem_below(&self, key: &str, max_exclusive: i64) -> RateLimitResult<u64> {
        let mut conn = self.connection()?;
        let removed = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", max_exclusive))
            .query_async::<u64>(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> RateLimitResult<u64> {
        let mut conn = self.connection()?;
        let count = redis::cmd("ZCARD")
            .arg(key)
            .query_async::<u64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn zoldest(&self, key: &str) -> RateLimitResult<Option<i64>> {
        let mut conn = self.connection()?;
        let oldest = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async::<Vec<(String, f64)>>(&mut conn)
            .await?;
        Ok(oldest.first().map(|(_, score)| *score as i64))
    }

    async fn expire(&self, key: &str, seconds: u64) -> RateLimitResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> RateLimitResult<Option<String>> {
        let mut conn = self.connection()?;
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RateLimitResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> RateLimitResult<()> {
        let mut conn = self.connection()?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.conn.write().take().is_some() {
            debug!("Redis connection released");
        }
    }
}
