//! In-process implementation of the window store.
//!
//! Mirrors the Redis semantics the limiter relies on: ordered sets keyed by
//! score then member, string values, and per-key TTLs that are enforced
//! lazily on access.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::WindowStore;
use crate::error::{RateLimitError, RateLimitResult};

#[derive(Debug)]
enum Value {
    Sorted(BTreeSet<(i64, String)>),
    Str(String),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> RateLimitError {
    RateLimitError::StoreUnavailable(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

/// A store that keeps everything in a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|slot| !slot.is_expired(now)).count()
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.slots.remove_if(key, |_, slot| slot.is_expired(now));
    }

    fn with_sorted<T>(
        &self,
        key: &str,
        empty: T,
        f: impl FnOnce(&mut BTreeSet<(i64, String)>) -> T,
    ) -> RateLimitResult<T> {
        self.evict_if_expired(key);
        match self.slots.get_mut(key) {
            None => Ok(empty),
            Some(mut slot) => match &mut slot.value {
                Value::Sorted(set) => Ok(f(set)),
                Value::Str(_) => Err(wrong_type(key)),
            },
        }
    }
}

#[async_trait]
impl WindowStore for InMemoryStore {
    async fn zadd(&self, key: &str, score: i64, member: &str) -> RateLimitResult<()> {
        self.evict_if_expired(key);
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Sorted(BTreeSet::new()),
            expires_at: None,
        });

        match &mut slot.value {
            Value::Sorted(set) => {
                // Re-adding a member only updates its score.
                set.retain(|(_, m)| m != member);
                set.insert((score, member.to_string()));
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn zrem_below(&self, key: &str, max_exclusive: i64) -> RateLimitResult<u64> {
        let removed = self.with_sorted(key, 0, |set| {
            let before = set.len();
            set.retain(|(score, _)| *score >= max_exclusive);
            (before - set.len()) as u64
        })?;

        // Redis drops a sorted set once its last member is gone.
        self.slots
            .remove_if(key, |_, slot| matches!(&slot.value, Value::Sorted(s) if s.is_empty()));
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> RateLimitResult<u64> {
        self.with_sorted(key, 0, |set| set.len() as u64)
    }

    async fn zoldest(&self, key: &str) -> RateLimitResult<Option<i64>> {
        self.with_sorted(key, None, |set| set.first().map(|(score, _)| *score))
    }

    async fn expire(&self, key: &str, seconds: u64) -> RateLimitResult<()> {
        self.evict_if_expired(key);
        if let Some(mut slot) = self.slots.get_mut(key) {
            // A TTL past what `Instant` can represent means no expiry.
            slot.expires_at = Instant::now().checked_add(Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> RateLimitResult<Option<String>> {
        self.evict_if_expired(key);
        match self.slots.get(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::Str(value) => Ok(Some(value.clone())),
                Value::Sorted(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RateLimitResult<()> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Instant::now().checked_add(Duration::from_millis(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn ping(&self) -> RateLimitResult<()> {
        Ok(())
    }
}
