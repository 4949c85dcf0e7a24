//! Engine configuration and defaults.
//!
//! These values control batch sizing, the write-through and recovery cadence,
//! the synchronization pool, and every timeout on the allocation path. The
//! defaults match the reference deployment.
//!
//! ## Key Concepts
//! - **Batch size**: how many IDs one cache-tier reservation carves out.
//! - **Cadence**: write-through runs when the new version is 1 or a multiple of
//!   `write_every_n`; recovery checks use `recover_every_n`.
//! - **Backpressure**: the sync channel is bounded; a full channel throttles
//!   new reservations instead of growing a queue.

use crate::{Error, Result};
use core::time::Duration;

/// Number of IDs reserved from the cache tier per reservation.
pub const DEFAULT_BATCH_SIZE: i64 = 10_000;

/// Write the cache counter back to the durable store every N versions.
pub const DEFAULT_WRITE_EVERY_N: i64 = 10;

/// Check the cache counter against the durable store every N versions.
pub const DEFAULT_RECOVER_EVERY_N: i64 = 100;

/// Capacity of the bounded synchronization work channel.
pub const DEFAULT_SYNC_CHANNEL_SIZE: usize = 10_000;

/// Number of synchronization workers.
pub const DEFAULT_SYNC_WORKERS: usize = 10;

/// Upper bound on IDs handed out by one `allocate` call.
pub const DEFAULT_MAX_ALLOC_COUNT: i64 = 100;

/// How long an exhausted allocator waits for its pre-fetched segment.
pub const DEFAULT_REFILL_WAIT: Duration = Duration::from_secs(5);

/// Deadline applied to every cache-tier and durable-store call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifetime of the write-through lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);

/// Delay before a refill task retries after a failed reservation.
pub const DEFAULT_REFILL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Namespace prepended to every cache-tier key.
pub const DEFAULT_KEY_PREFIX: &str = "idalloc:";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: i64,
    pub write_every_n: i64,
    pub recover_every_n: i64,
    pub sync_channel_size: usize,
    pub sync_workers: usize,
    pub max_alloc_count: i64,
    pub refill_wait: Duration,
    pub io_timeout: Duration,
    pub lock_ttl: Duration,
    pub refill_retry_delay: Duration,
    pub key_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            write_every_n: DEFAULT_WRITE_EVERY_N,
            recover_every_n: DEFAULT_RECOVER_EVERY_N,
            sync_channel_size: DEFAULT_SYNC_CHANNEL_SIZE,
            sync_workers: DEFAULT_SYNC_WORKERS,
            max_alloc_count: DEFAULT_MAX_ALLOC_COUNT,
            refill_wait: DEFAULT_REFILL_WAIT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            lock_ttl: DEFAULT_LOCK_TTL,
            refill_retry_delay: DEFAULT_REFILL_RETRY_DELAY,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] naming the first offending knob.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::InvalidRequest { reason });

        if self.max_alloc_count < 1 {
            return invalid(format!(
                "max_alloc_count must be at least 1 (got {})",
                self.max_alloc_count
            ));
        }
        // A single request must always fit in one replacement segment.
        if self.batch_size < self.max_alloc_count {
            return invalid(format!(
                "batch_size ({}) must not be smaller than max_alloc_count ({})",
                self.batch_size, self.max_alloc_count
            ));
        }
        if self.write_every_n < 1 || self.recover_every_n < 1 {
            return invalid("write_every_n and recover_every_n must be at least 1".to_string());
        }
        if self.sync_workers == 0 {
            return invalid("sync_workers must be greater than 0".to_string());
        }
        if self.sync_channel_size == 0 {
            return invalid("sync_channel_size must be greater than 0".to_string());
        }
        Ok(())
    }
}
