//! Version-guarded synchronization between the cache tier and the durable
//! store.
//!
//! Two operations, both safe to repeat and to apply out of order because each
//! compares versions before writing:
//!
//! - **Recovery** copies durable rows into the cache, but only over counters
//!   whose version is absent or strictly lower.
//! - **Write-through** persists a reserved counter under a cross-process lock,
//!   inserting the row if missing and otherwise updating it only when the
//!   stored version is strictly lower.

use crate::{
    AllocationState, Error, RequestContext, Result, SyncItem,
    cache::{CacheTierRef, KeySpace},
    common::deadline::with_deadline,
    config::EngineConfig,
    issuer::SyncPolicy,
    store::DurableStoreRef,
};
use core::time::Duration;

pub struct Synchronizer {
    cache: CacheTierRef,
    store: DurableStoreRef,
    keys: KeySpace,
    policy: SyncPolicy,
    io_timeout: Duration,
    lock_ttl: Duration,
}

impl Synchronizer {
    pub fn new(cache: CacheTierRef, store: DurableStoreRef, config: &EngineConfig) -> Self {
        Self {
            cache,
            store,
            keys: KeySpace::new(config.key_prefix.clone()),
            policy: SyncPolicy::from(config),
            io_timeout: config.io_timeout,
            lock_ttl: config.lock_ttl,
        }
    }

    /// Handles one work item. Recovery runs before write-through so a write
    /// never races ahead of a stale-cache repair.
    ///
    /// Never fails: every error is logged and the item is abandoned, because
    /// the next periodic trigger supersedes it.
    pub async fn process(&self, ctx: &RequestContext, item: SyncItem) {
        let service = item.service_name.as_str();
        let version = item.data_version;

        if self.policy.recovery_due(version) {
            if let Err(e) = self.recover(ctx, core::slice::from_ref(&item.service_name)).await {
                log_failure(ctx, service, version, "recovery", &e);
            }
        }

        if self.policy.write_due(version) {
            let state = AllocationState::from(item.clone());
            match self.write_through(ctx, &state).await {
                Ok(affected) => {
                    tracing::debug!(trace_id = %ctx, service, version, affected, "Write-through complete");
                }
                Err(e) => log_failure(ctx, service, version, "write-through", &e),
            }
        }
    }

    /// Repairs cache counters from the durable store.
    ///
    /// An empty `services` slice recovers every known service. Returns the
    /// durable rows examined.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure; counters handled before it stay
    /// repaired.
    pub async fn recover(
        &self,
        ctx: &RequestContext,
        services: &[String],
    ) -> Result<Vec<AllocationState>> {
        let rows = with_deadline(
            self.io_timeout,
            "durable fetch",
            self.store.fetch_state(services),
        )
        .await?;
        self.recover_rows(ctx, &rows).await?;
        Ok(rows)
    }

    /// Raises each row's cache counter to the durable state if it is missing
    /// or behind.
    ///
    /// # Errors
    ///
    /// Returns the first cache failure.
    async fn recover_rows(&self, ctx: &RequestContext, rows: &[AllocationState]) -> Result<()> {
        for row in rows {
            let key = self.keys.counter(&row.service_name);
            let current = with_deadline(
                self.io_timeout,
                "cache compare-and-set",
                self.cache
                    .compare_and_set_if_behind(&key, row.last_alloc_value, row.data_version),
            )
            .await?;

            if current.data_version == row.data_version
                && current.last_alloc_value == row.last_alloc_value
            {
                tracing::debug!(
                    trace_id = %ctx,
                    service = %row.service_name,
                    version = row.data_version,
                    "Cache counter matches durable state"
                );
            } else {
                tracing::debug!(
                    trace_id = %ctx,
                    service = %row.service_name,
                    durable_version = row.data_version,
                    cache_version = current.data_version,
                    "Cache counter ahead of durable state, left untouched"
                );
            }
        }
        Ok(())
    }

    /// Persists `state` to the durable store under the per-service lock.
    ///
    /// # Errors
    ///
    /// - [`Error::LockContended`] if another holder is already syncing this
    ///   service.
    /// - [`Error::Transient`] on any storage failure.
    pub async fn write_through(&self, ctx: &RequestContext, state: &AllocationState) -> Result<u64> {
        let lock_key = self
            .keys
            .lock(&format!("insert_or_update_db_{}", state.service_name));

        let acquired = with_deadline(
            self.io_timeout,
            "cache lock",
            self.cache.acquire_lock(&lock_key, self.lock_ttl),
        )
        .await?;
        if !acquired {
            return Err(Error::LockContended { key: lock_key });
        }

        let res = self.upsert(state).await;

        if let Err(e) = with_deadline(
            self.io_timeout,
            "cache unlock",
            self.cache.release_lock(&lock_key),
        )
        .await
        {
            // The TTL reclaims the key eventually.
            tracing::warn!(trace_id = %ctx, key = %lock_key, error = %e, "Failed to release lock");
        }

        res
    }

    async fn upsert(&self, state: &AllocationState) -> Result<u64> {
        let existing = with_deadline(
            self.io_timeout,
            "durable fetch",
            self.store
                .fetch_state(core::slice::from_ref(&state.service_name)),
        )
        .await?;

        if existing.is_empty() {
            with_deadline(self.io_timeout, "durable insert", self.store.insert_state(state)).await
        } else {
            with_deadline(self.io_timeout, "durable update", self.store.update_state(state)).await
        }
    }
}

fn log_failure(ctx: &RequestContext, service: &str, version: i64, step: &str, err: &Error) {
    match err {
        Error::LockContended { .. } => {
            tracing::info!(trace_id = %ctx, service, version, step, "Another holder is syncing, item dropped");
        }
        e if e.is_critical() => {
            tracing::error!(trace_id = %ctx, service, version, step, error = %e, "Sync step failed");
        }
        e => {
            tracing::warn!(trace_id = %ctx, service, version, step, error = %e, "Sync step failed");
        }
    }
}
