//! Batch reservation against the cache tier.
//!
//! [`BatchIssuer::reserve`] carves the next `batch_size` IDs for a service out
//! of the shared cache counter and, depending on the resulting version,
//! schedules write-through and recovery work for the synchronization pool.

use crate::{
    CacheCounter, Error, RequestContext, Result, Segment, SyncItem,
    cache::{CacheTierRef, KeySpace},
    common::deadline::with_deadline,
    config::EngineConfig,
};
use core::time::Duration;
use tokio::sync::mpsc;

/// Decides, from a freshly reserved version, which synchronization steps are
/// due.
///
/// Version 1 always triggers both, so a brand-new service is persisted and
/// recovery-checked on its very first batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncPolicy {
    write_every_n: i64,
    recover_every_n: i64,
}

impl SyncPolicy {
    pub const fn new(write_every_n: i64, recover_every_n: i64) -> Self {
        Self {
            write_every_n,
            recover_every_n,
        }
    }

    pub const fn write_due(&self, version: i64) -> bool {
        version == 1 || version % self.write_every_n == 0
    }

    pub const fn recovery_due(&self, version: i64) -> bool {
        version == 1 || version % self.recover_every_n == 0
    }

    pub const fn any_due(&self, version: i64) -> bool {
        self.write_due(version) || self.recovery_due(version)
    }
}

impl From<&EngineConfig> for SyncPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.write_every_n, config.recover_every_n)
    }
}

/// Reserves ID batches from the cache tier and feeds the sync channel.
pub struct BatchIssuer {
    cache: CacheTierRef,
    keys: KeySpace,
    batch_size: i64,
    io_timeout: Duration,
    policy: SyncPolicy,
    sync_tx: mpsc::Sender<SyncItem>,
}

impl BatchIssuer {
    pub fn new(cache: CacheTierRef, config: &EngineConfig, sync_tx: mpsc::Sender<SyncItem>) -> Self {
        Self {
            cache,
            keys: KeySpace::new(config.key_prefix.clone()),
            batch_size: config.batch_size,
            io_timeout: config.io_timeout,
            policy: SyncPolicy::from(config),
            sync_tx,
        }
    }

    pub const fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Reserves the next batch for `service`.
    ///
    /// When the new version makes a write-through or a recovery check due,
    /// the item is pushed onto the bounded sync channel. That push waits for
    /// capacity, so slow synchronization throttles reservations.
    ///
    /// # Errors
    ///
    /// - [`Error::Transient`] if the cache tier call fails or times out.
    /// - [`Error::DataIntegrity`] if the returned counter is inconsistent.
    pub async fn reserve(&self, ctx: &RequestContext, service: &str) -> Result<Segment> {
        let key = self.keys.counter(service);
        let counter = with_deadline(
            self.io_timeout,
            "cache atomic increment",
            self.cache.atomic_increment(&key, self.batch_size),
        )
        .await
        .inspect_err(|e| {
            if e.is_critical() {
                tracing::error!(trace_id = %ctx, service, error = %e, "Batch reservation hit corrupt counter");
            }
        })?;

        let segment = self.segment_from(ctx, service, counter)?;
        tracing::debug!(
            trace_id = %ctx,
            service,
            last_alloc_value = counter.last_alloc_value,
            data_version = counter.data_version,
            "Reserved batch"
        );

        if self.policy.any_due(counter.data_version) {
            let item = SyncItem {
                service_name: service.to_string(),
                last_alloc_value: counter.last_alloc_value,
                data_version: counter.data_version,
            };
            if let Err(e) = self.sync_tx.send(item).await {
                tracing::warn!(
                    trace_id = %ctx,
                    service,
                    data_version = e.0.data_version,
                    "Sync channel closed, item dropped"
                );
            }
        }

        Ok(segment)
    }

    fn segment_from(
        &self,
        ctx: &RequestContext,
        service: &str,
        counter: CacheCounter,
    ) -> Result<Segment> {
        if counter.data_version < 1 || counter.last_alloc_value < self.batch_size {
            let err = Error::data_integrity(format!(
                "inconsistent counter for {service}: value {} version {} after +{}",
                counter.last_alloc_value, counter.data_version, self.batch_size
            ));
            tracing::error!(trace_id = %ctx, service, error = %err, "Batch reservation returned inconsistent counter");
            return Err(err);
        }
        Ok(Segment::new(
            counter.last_alloc_value - self.batch_size,
            counter.last_alloc_value,
        ))
    }
}
