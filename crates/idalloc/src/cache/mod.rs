//! Cache tier adapters.
//!
//! The cache tier holds one counter hash per service plus short-lived lock
//! keys. It is fast but volatile: any key may disappear at any time, and an
//! absent counter simply means "version 0".
//!
//! ## Implementations
//!
//! - [`RedisCache`] - production adapter over a multiplexed Redis connection.
//! - [`MemoryCache`] - in-process adapter for single-node mode and tests.

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use crate::{CacheCounter, Result};
use core::time::Duration;
use std::sync::Arc;

/// Hash field holding the last reserved value.
pub const LAST_ALLOC_VALUE_FIELD: &str = "lastAllocValue";

/// Hash field holding the reservation counter.
pub const DATA_VERSION_FIELD: &str = "dataVersion";

pub type CacheTierRef = Arc<dyn CacheTier>;

#[async_trait::async_trait]
pub trait CacheTier: Send + Sync {
    /// Adds `delta` to the value field and 1 to the version field in a single
    /// atomic round trip, returning both new values.
    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<CacheCounter>;

    /// Overwrites the counter only if the stored version is absent or strictly
    /// lower than `version`. Returns the counter as it stands afterwards.
    async fn compare_and_set_if_behind(
        &self,
        key: &str,
        value: i64,
        version: i64,
    ) -> Result<CacheCounter>;

    /// Reads the counter, or `None` when either field is missing.
    async fn read(&self, key: &str) -> Result<Option<CacheCounter>>;

    /// Creates `key` only if it does not exist, expiring after `ttl`.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn release_lock(&self, key: &str) -> Result<()>;
}

/// Builds namespaced cache-tier keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of the counter hash for `service`.
    pub fn counter(&self, service: &str) -> String {
        format!("{}alloc_info_{service}", self.prefix)
    }

    /// Key of the lock guarding the critical section called `name`.
    pub fn lock(&self, name: &str) -> String {
        format!("{}lock_{name}", self.prefix)
    }
}
