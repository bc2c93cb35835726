//! Sliding log counter.
//!
//! Each window key owns an ordered set in the store whose members are the
//! requests seen for that key, scored by their arrival time in milliseconds.
//! Counting a request inserts it, purges everything older than the window,
//! and reads the cardinality.

use std::sync::Arc;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use crate::error::{RateLimitError, RateLimitResult};
use crate::store::WindowStore;

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// The effective limit for the request
    pub limit: u64,
    /// Requests in the window, this one included
    pub current: u64,
    /// `limit - current`, floored at zero
    pub remaining: u64,
    /// Epoch milliseconds at which the window next admits a request
    pub reset_time: i64,
}

impl RateLimitInfo {
    /// Whether the window is saturated. The `limit`-th request already is.
    pub fn is_exceeded(&self) -> bool {
        self.remaining == 0
    }

    /// Whole seconds until `reset_time`, rounded up and floored at zero.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let wait_ms = (self.reset_time - now_ms).max(0) as u64;
        wait_ms.div_ceil(1000)
    }
}

/// Records requests in a per-key sliding log and counts the trailing window.
pub struct SlidingWindowCounter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Record one request under `key` and count the window it falls in.
    ///
    /// The store commands are issued one after another without a transaction,
    /// so concurrent requests on the same key may interleave and both be
    /// admitted right at the boundary.
    pub async fn record_and_count(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window_ms: u64,
    ) -> RateLimitResult<RateLimitInfo> {
        self.count_at(key, limit, window_ms)
            .await
            .map_err(RateLimitError::counter)
    }

    async fn count_at(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window_ms: u64,
    ) -> RateLimitResult<RateLimitInfo> {
        let now = self.clock.now_ms();
        let window = i64::try_from(window_ms).unwrap_or(i64::MAX);
        let window_start = now.saturating_sub(window);
        let key = key.as_str();

        self.store.zadd(key, now, &entry_member(now)).await?;
        self.store.zrem_below(key, window_start).await?;
        let count = self.store.zcard(key).await?;
        self.store.expire(key, ttl_secs(window_ms)).await?;

        let mut reset_time = now.saturating_add(window);
        if count >= limit {
            if let Some(oldest) = self.store.zoldest(key).await? {
                reset_time = oldest.saturating_add(window);
            }
        }

        let info = RateLimitInfo {
            limit,
            current: count,
            remaining: limit.saturating_sub(count),
            reset_time,
        };

        trace!(
            key = %key,
            limit = info.limit,
            current = info.current,
            remaining = info.remaining,
            reset_time = info.reset_time,
            "Counted sliding window"
        );

        Ok(info)
    }
}

/// Unique log member for a request arriving at `now`.
///
/// Two requests in the same millisecond must stay two entries.
fn entry_member(now: i64) -> String {
    format!("{}-{}", now, uuid::Uuid::new_v4().simple())
}

/// Log TTL in whole seconds, at least one so the key is never expired on write.
fn ttl_secs(window_ms: u64) -> u64 {
    window_ms.div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::store::testing::FailingStore;
    use crate::store::InMemoryStore;

    const T0: i64 = 1_700_000_000_000;

    fn counter() -> (SlidingWindowCounter, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(T0));
        let counter = SlidingWindowCounter::with_clock(store.clone(), clock.clone());
        (counter, store, clock)
    }

    async fn seed(store: &InMemoryStore, key: &RateLimitKey, scores: &[i64]) {
        for (i, score) in scores.iter().enumerate() {
            store
                .zadd(key.as_str(), *score, &format!("{}-seed{}", score, i))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_request_under_limit() {
        let (counter, _, _) = counter();
        let key = RateLimitKey::new("ratelimit:ip:127.0.0.1");

        let info = counter.record_and_count(&key, 5, 60_000).await.unwrap();

        assert_eq!(info.current, 1);
        assert_eq!(info.remaining, 4);
        assert_eq!(info.reset_time, T0 + 60_000);
        assert!(!info.is_exceeded());
    }

    #[tokio::test]
    async fn test_fourth_request_leaves_one_remaining() {
        let (counter, store, _) = counter();
        let key = RateLimitKey::new("ratelimit:ip:127.0.0.1");
        seed(&store, &key, &[T0 - 3_000, T0 - 2_000, T0 - 1_000]).await;

        let info = counter.record_and_count(&key, 5, 60_000).await.unwrap();

        assert_eq!(info.current, 4);
        assert_eq!(info.remaining, 1);
        assert_eq!(info.limit, 5);
    }

    #[tokio::test]
    async fn test_limit_th_request_saturates_window() {
        let (counter, _, _) = counter();
        let key = RateLimitKey::new("k");

        for expected in 1..=2 {
            let info = counter.record_and_count(&key, 3, 60_000).await.unwrap();
            assert_eq!(info.current, expected);
            assert!(!info.is_exceeded());
        }

        let info = counter.record_and_count(&key, 3, 60_000).await.unwrap();
        assert_eq!(info.current, 3);
        assert_eq!(info.remaining, 0);
        assert!(info.is_exceeded());
    }

    #[tokio::test]
    async fn test_saturated_reset_time_follows_oldest_entry() {
        let (counter, store, _) = counter();
        let key = RateLimitKey::new("k");
        seed(&store, &key, &[T0 - 45_000, T0 - 30_000, T0 - 20_000, T0 - 10_000, T0 - 5_000]).await;

        let info = counter.record_and_count(&key, 5, 60_000).await.unwrap();

        assert_eq!(info.current, 6);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.reset_time, T0 - 45_000 + 60_000);
        assert_eq!(info.retry_after_secs(T0), 15);
    }

    #[tokio::test]
    async fn test_oversized_window_saturates_instead_of_overflowing() {
        let (counter, _, _) = counter();
        let key = RateLimitKey::new("k");

        let info = counter.record_and_count(&key, 2, i64::MAX as u64).await.unwrap();
        assert_eq!(info.current, 1);
        assert_eq!(info.reset_time, i64::MAX);

        let info = counter.record_and_count(&key, 2, u64::MAX).await.unwrap();
        assert_eq!(info.current, 2);
        assert!(info.is_exceeded());
        assert_eq!(info.reset_time, i64::MAX);
    }

    #[tokio::test]
    async fn test_stale_entries_are_purged() {
        let (counter, store, _) = counter();
        let key = RateLimitKey::new("k");
        // One entry just outside the window, one exactly on its start.
        seed(&store, &key, &[T0 - 60_001, T0 - 60_000]).await;

        let info = counter.record_and_count(&key, 5, 60_000).await.unwrap();

        assert_eq!(info.current, 2);
        assert_eq!(store.zoldest(key.as_str()).await.unwrap(), Some(T0 - 60_000));
    }

    #[tokio::test]
    async fn test_window_slides_with_time() {
        let (counter, _, clock) = counter();
        let key = RateLimitKey::new("k");

        counter.record_and_count(&key, 2, 1_000).await.unwrap();
        clock.advance(500);
        let info = counter.record_and_count(&key, 2, 1_000).await.unwrap();
        assert!(info.is_exceeded());
        assert_eq!(info.reset_time, T0 + 1_000);

        clock.advance(501);
        let info = counter.record_and_count(&key, 2, 1_000).await.unwrap();
        assert_eq!(info.current, 2);

        clock.advance(1_001);
        let info = counter.record_and_count(&key, 2, 1_000).await.unwrap();
        assert_eq!(info.current, 1);
        assert_eq!(info.remaining, 1);
    }

    #[tokio::test]
    async fn test_same_millisecond_requests_are_distinct() {
        let (counter, _, _) = counter();
        let key = RateLimitKey::new("k");

        for _ in 0..3 {
            counter.record_and_count(&key, 10, 60_000).await.unwrap();
        }
        let info = counter.record_and_count(&key, 10, 60_000).await.unwrap();

        assert_eq!(info.current, 4);
    }

    #[tokio::test]
    async fn test_keys_do_not_share_logs() {
        let (counter, _, _) = counter();
        let a = RateLimitKey::new("ratelimit:ip:10.0.0.1");
        let b = RateLimitKey::new("ratelimit:ip:10.0.0.2");

        counter.record_and_count(&a, 5, 60_000).await.unwrap();
        counter.record_and_count(&a, 5, 60_000).await.unwrap();
        let info = counter.record_and_count(&b, 5, 60_000).await.unwrap();

        assert_eq!(info.current, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_counter_unavailable() {
        let clock = Arc::new(ManualClock::new(T0));
        let counter = SlidingWindowCounter::with_clock(Arc::new(FailingStore), clock);

        let err = counter
            .record_and_count(&RateLimitKey::new("k"), 5, 60_000)
            .await
            .unwrap_err();

        assert!(matches!(err, RateLimitError::CounterUnavailable(_)));
    }

    #[test]
    fn test_retry_after_rounds_up_and_floors_at_zero() {
        let info = RateLimitInfo {
            limit: 1,
            current: 1,
            remaining: 0,
            reset_time: T0 + 1_001,
        };
        assert_eq!(info.retry_after_secs(T0), 2);
        assert_eq!(info.retry_after_secs(T0 + 1_000), 1);
        assert_eq!(info.retry_after_secs(T0 + 1_001), 0);
        assert_eq!(info.retry_after_secs(T0 + 5_000), 0);
    }

    #[test]
    fn test_ttl_secs() {
        assert_eq!(ttl_secs(60_000), 60);
        assert_eq!(ttl_secs(1_500), 2);
        assert_eq!(ttl_secs(10), 1);
    }
}
