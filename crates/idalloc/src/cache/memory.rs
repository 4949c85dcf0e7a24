use super::CacheTier;
use crate::{CacheCounter, Error, Result};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
enum Slot {
    Counter(CacheCounter),
    /// A hash whose fields no longer parse as integers.
    Malformed,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, Slot>,
    locks: HashMap<String, Instant>,
}

/// In-process cache tier with the same atomicity guarantees as the Redis
/// adapter: every operation runs under one mutex.
///
/// Besides single-node deployments, it lets tests simulate data loss with
/// [`MemoryCache::clear`] and corruption with [`MemoryCache::corrupt`].
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every counter and lock, as a restarted cache server would.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.counters.clear();
        inner.locks.clear();
    }

    /// Replaces the counter at `key` with unparseable data.
    pub fn corrupt(&self, key: &str) {
        self.inner
            .lock()
            .counters
            .insert(key.to_string(), Slot::Malformed);
    }

    /// Overwrites the counter at `key` unconditionally.
    pub fn set(&self, key: &str, counter: CacheCounter) {
        self.inner
            .lock()
            .counters
            .insert(key.to_string(), Slot::Counter(counter));
    }
}

fn malformed(key: &str) -> Error {
    Error::data_integrity(format!("counter at {key} is malformed"))
}

#[async_trait::async_trait]
impl CacheTier for MemoryCache {
    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<CacheCounter> {
        let mut inner = self.inner.lock();
        let slot = inner
            .counters
            .entry(key.to_string())
            .or_insert(Slot::Counter(CacheCounter::default()));
        match slot {
            Slot::Counter(counter) => {
                let (Some(value), Some(version)) = (
                    counter.last_alloc_value.checked_add(delta),
                    counter.data_version.checked_add(1),
                ) else {
                    return Err(Error::data_integrity(format!(
                        "increment of {key} by {delta} overflows"
                    )));
                };
                *counter = CacheCounter::new(value, version);
                Ok(*counter)
            }
            Slot::Malformed => Err(malformed(key)),
        }
    }

    async fn compare_and_set_if_behind(
        &self,
        key: &str,
        value: i64,
        version: i64,
    ) -> Result<CacheCounter> {
        let mut inner = self.inner.lock();
        let incoming = CacheCounter::new(value, version);
        match inner.counters.get(key).copied() {
            Some(Slot::Counter(current)) if current.data_version >= version => Ok(current),
            _ => {
                inner
                    .counters
                    .insert(key.to_string(), Slot::Counter(incoming));
                Ok(incoming)
            }
        }
    }

    async fn read(&self, key: &str) -> Result<Option<CacheCounter>> {
        match self.inner.lock().counters.get(key) {
            None => Ok(None),
            Some(Slot::Counter(counter)) => Ok(Some(*counter)),
            Some(Slot::Malformed) => Err(malformed(key)),
        }
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.locks.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                inner.locks.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        self.inner.lock().locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_starts_from_empty() {
        let cache = MemoryCache::new();
        let first = cache.atomic_increment("k", 100).await.unwrap();
        assert_eq!(first, CacheCounter::new(100, 1));
        let second = cache.atomic_increment("k", 100).await.unwrap();
        assert_eq!(second, CacheCounter::new(200, 2));
        assert_eq!(cache.read("k").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn overflowing_increment_is_rejected() {
        let cache = MemoryCache::new();
        cache.set("k", CacheCounter::new(i64::MAX - 50, 7));

        let err = cache.atomic_increment("k", 100).await.unwrap_err();
        assert!(err.is_critical());
        // The counter is left as it was.
        assert_eq!(
            cache.read("k").await.unwrap(),
            Some(CacheCounter::new(i64::MAX - 50, 7))
        );
    }

    #[tokio::test]
    async fn compare_and_set_never_regresses() {
        let cache = MemoryCache::new();
        cache.set("k", CacheCounter::new(500, 5));

        // Behind: ignored.
        let res = cache.compare_and_set_if_behind("k", 300, 3).await.unwrap();
        assert_eq!(res, CacheCounter::new(500, 5));
        // Equal: ignored.
        let res = cache.compare_and_set_if_behind("k", 900, 5).await.unwrap();
        assert_eq!(res, CacheCounter::new(500, 5));
        // Ahead: applied.
        let res = cache.compare_and_set_if_behind("k", 700, 7).await.unwrap();
        assert_eq!(res, CacheCounter::new(700, 7));
        // Absent: applied.
        let res = cache.compare_and_set_if_behind("new", 10, 1).await.unwrap();
        assert_eq!(res, CacheCounter::new(10, 1));
    }

    #[tokio::test]
    async fn compare_and_set_repairs_malformed_counter() {
        let cache = MemoryCache::new();
        cache.corrupt("k");
        assert!(cache.read("k").await.unwrap_err().is_critical());
        assert!(cache.atomic_increment("k", 1).await.unwrap_err().is_critical());

        let res = cache.compare_and_set_if_behind("k", 40, 4).await.unwrap();
        assert_eq!(res, CacheCounter::new(40, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_exclusive_until_released_or_expired() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(5);
        assert!(cache.acquire_lock("lock", ttl).await.unwrap());
        assert!(!cache.acquire_lock("lock", ttl).await.unwrap());

        cache.release_lock("lock").await.unwrap();
        assert!(cache.acquire_lock("lock", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.acquire_lock("lock", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let cache = MemoryCache::new();
        cache.atomic_increment("k", 10).await.unwrap();
        cache.clear();
        assert_eq!(cache.read("k").await.unwrap(), None);
    }
}
