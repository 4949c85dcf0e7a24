use super::{CacheTier, DATA_VERSION_FIELD, LAST_ALLOC_VALUE_FIELD};
use crate::{CacheCounter, Error, Result};
use core::time::Duration;
use redis::{Script, aio::MultiplexedConnection};

/// Overwrites the counter hash only when the stored version is missing or
/// behind the supplied one, and returns the resulting pair either way.
const COMPARE_VERSION_AND_SET: &str = r#"
local key = KEYS[1]
local valueField = KEYS[2]
local versionField = KEYS[3]
local inputVersion = tonumber(ARGV[2])

local values = redis.call("HMGET", key, valueField, versionField)
local valueInCache = tonumber(values[1])
local versionInCache = tonumber(values[2])
if versionInCache == nil or valueInCache == nil or versionInCache < inputVersion then
    redis.call("HSET", key, valueField, ARGV[1], versionField, ARGV[2])
    return {ARGV[1], ARGV[2]}
end
return {values[1], values[2]}
"#;

/// Cache tier backed by Redis.
///
/// Holds a single multiplexed connection; clones of it are cheap and share
/// the underlying socket, so every call takes its own handle.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
    compare_and_set: Script,
}

impl RedisCache {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            compare_and_set: Script::new(COMPARE_VERSION_AND_SET),
        }
    }
}

/// The dual increment either comes back whole or the counter is suspect:
/// connectivity problems stay transient, everything else is an integrity
/// failure.
fn increment_error(key: &str, err: redis::RedisError) -> Error {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        Error::transient(format!("cache tier increment of {key}: {err}"))
    } else {
        Error::data_integrity(format!("cache tier increment of {key}: {err}"))
    }
}

#[async_trait::async_trait]
impl CacheTier for RedisCache {
    async fn atomic_increment(&self, key: &str, delta: i64) -> Result<CacheCounter> {
        let mut conn = self.conn.clone();
        let (last_alloc_value, data_version): (i64, i64) = redis::pipe()
            .atomic()
            .hincr(key, LAST_ALLOC_VALUE_FIELD, delta)
            .hincr(key, DATA_VERSION_FIELD, 1)
            .query_async(&mut conn)
            .await
            .map_err(|e| increment_error(key, e))?;
        Ok(CacheCounter::new(last_alloc_value, data_version))
    }

    async fn compare_and_set_if_behind(
        &self,
        key: &str,
        value: i64,
        version: i64,
    ) -> Result<CacheCounter> {
        let mut conn = self.conn.clone();
        let mut invocation = self.compare_and_set.prepare_invoke();
        invocation
            .key(key)
            .key(LAST_ALLOC_VALUE_FIELD)
            .key(DATA_VERSION_FIELD)
            .arg(value)
            .arg(version);
        let (last_alloc_value, data_version): (i64, i64) =
            invocation.invoke_async(&mut conn).await?;
        Ok(CacheCounter::new(last_alloc_value, data_version))
    }

    async fn read(&self, key: &str) -> Result<Option<CacheCounter>> {
        let mut conn = self.conn.clone();
        let (value, version): (Option<i64>, Option<i64>) = redis::cmd("HMGET")
            .arg(key)
            .arg(LAST_ALLOC_VALUE_FIELD)
            .arg(DATA_VERSION_FIELD)
            .query_async(&mut conn)
            .await?;
        Ok(match (value, version) {
            (Some(value), Some(version)) => Some(CacheCounter::new(value, version)),
            _ => None,
        })
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}
