//! Expiring counters backing the rate limiter.

use std::collections::HashMap;
use std::sync::Arc;

use cellar_core::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::AccessError;

/// A cache with atomic increments and key expiry. The in-memory
/// implementation serves a single process; a shared cache (Redis and
/// the like) plugs in here for multi-instance deployments.
pub trait CounterStore: Send + Sync {
    /// Add `delta` and return the new value. Missing or expired keys
    /// start at zero.
    fn incr(&self, key: &str, delta: u64) -> impl Future<Output = Result<u64, AccessError>> + Send;

    /// Set a TTL on an existing key. Returns `false` if the key is absent.
    fn expire(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<bool, AccessError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<u64>, AccessError>> + Send;
}

#[derive(Debug, Clone)]
struct Entry {
    value: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Process-local [`CounterStore`].
#[derive(Clone)]
pub struct InMemoryCounterStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Drop expired keys. Run periodically; lookups already ignore them.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str, delta: u64) -> Result<u64, AccessError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: 0,
                expires_at: None,
            };
        }
        entry.value = entry.value.saturating_add(delta);
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, AccessError> {
        let now = self.clock.now();
        let ttl = i64::try_from(ttl_secs)
            .map_err(|_| AccessError::Counter(format!("ttl {ttl_secs} out of range")))?;
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::seconds(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, AccessError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (InMemoryCounterStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        (InMemoryCounterStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn incr_counts_and_expires() {
        let (store, clock) = store();
        assert_eq!(store.incr("k", 1).await.unwrap(), 1);
        assert!(store.expire("k", 10).await.unwrap());
        assert_eq!(store.incr("k", 2).await.unwrap(), 3);

        clock.advance(Duration::seconds(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr("k", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_on_missing_key_is_false() {
        let (store, _) = store();
        assert!(!store.expire("nope", 10).await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let (store, clock) = store();
        store.incr("short", 1).await.unwrap();
        store.expire("short", 5).await.unwrap();
        store.incr("forever", 1).await.unwrap();

        clock.advance(Duration::seconds(6));
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }
}
