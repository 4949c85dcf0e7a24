//! The allocation engine.
//!
//! [`Engine`] is the single context object a process builds at startup. It
//! owns the allocator registry, the batch issuer and the synchronization pool,
//! and wires them to the cache tier and durable store it is given.
//!
//! ## Lifecycle
//!
//! 1. [`Engine::new`] validates the configuration and spawns the sync pool.
//! 2. [`Engine::start`] repairs every cache counter from the durable store and
//!    pre-creates an allocator for each known service.
//! 3. [`Engine::allocate`] serves requests.
//! 4. [`Engine::shutdown`] stops refill tasks, then drains the sync pool.

use crate::{
    AllocationState, CacheCounter, Error, RequestContext, Result,
    cache::{CacheTierRef, KeySpace},
    common::deadline::with_deadline,
    config::EngineConfig,
    issuer::BatchIssuer,
    registry::AllocatorRegistry,
    store::DurableStoreRef,
    sync::{SyncPool, Synchronizer},
};
use core::time::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Diagnostic view of one service across both tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub service_name: String,
    pub cache: Option<CacheCounter>,
    pub durable: Option<AllocationState>,
    /// Whether this process holds a live allocator for the service.
    pub active: bool,
}

pub struct Engine {
    config: EngineConfig,
    keys: KeySpace,
    cache: CacheTierRef,
    store: DurableStoreRef,
    registry: AllocatorRegistry,
    synchronizer: Arc<Synchronizer>,
    sync_pool: SyncPool,
    shutdown_token: CancellationToken,
}

impl Engine {
    /// Builds the engine and spawns its synchronization workers.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `config` fails validation.
    pub fn new(config: EngineConfig, cache: CacheTierRef, store: DurableStoreRef) -> Result<Self> {
        config.validate()?;

        let shutdown_token = CancellationToken::new();
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            &config,
        ));
        let sync_pool = SyncPool::spawn(
            Arc::clone(&synchronizer),
            config.sync_workers,
            config.sync_channel_size,
            shutdown_token.child_token(),
        );
        let issuer = Arc::new(BatchIssuer::new(
            Arc::clone(&cache),
            &config,
            sync_pool.sender(),
        ));
        let registry = AllocatorRegistry::new(issuer, config.clone(), shutdown_token.child_token());

        tracing::info!(
            batch_size = config.batch_size,
            write_every_n = config.write_every_n,
            recover_every_n = config.recover_every_n,
            sync_workers = config.sync_workers,
            "Engine configured"
        );

        Ok(Self {
            keys: KeySpace::new(config.key_prefix.clone()),
            config,
            cache,
            store,
            registry,
            synchronizer,
            sync_pool,
            shutdown_token,
        })
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Repairs cache counters from the durable store and pre-creates an
    /// allocator for every service found there.
    ///
    /// # Errors
    ///
    /// Any storage failure aborts startup; the process should not serve IDs
    /// from a cache tier it could not check.
    pub async fn start(&self, ctx: &RequestContext) -> Result<()> {
        let rows = self.synchronizer.recover(ctx, &[]).await?;
        tracing::info!(trace_id = %ctx, recovered = rows.len(), "Startup recovery complete");

        for row in &rows {
            self.registry.get_or_create(ctx, &row.service_name).await?;
        }
        tracing::info!(trace_id = %ctx, services = rows.len(), "Allocators pre-warmed");
        Ok(())
    }

    /// Allocates `count` distinct, increasing IDs for `service`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `count` is outside `1..=max_alloc_count`.
    /// - [`Error::Busy`] if the refill did not arrive in time.
    /// - [`Error::ServiceStopped`] once shutdown has begun.
    /// - Any error from seeding a new service's first segment.
    #[tracing::instrument(skip_all, fields(trace_id = %ctx, service = %service, count = count))]
    pub async fn allocate(&self, ctx: &RequestContext, service: &str, count: i64) -> Result<Vec<i64>> {
        if count < 1 || count > self.config.max_alloc_count {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "count must be between 1 and {} (got {count})",
                    self.config.max_alloc_count
                ),
            });
        }
        if service.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "service name must not be empty".to_string(),
            });
        }

        let allocator = self.registry.get_or_create(ctx, service).await?;
        allocator.allocate(count).await.inspect_err(|e| match e {
            Error::Busy { .. } => tracing::warn!("Refill not ready in time"),
            Error::ServiceStopped => tracing::debug!("Allocation refused, service stopped"),
            _ => {}
        })
    }

    /// Reads the cache counter and durable row for `service`.
    ///
    /// # Errors
    ///
    /// Returns the first adapter failure.
    pub async fn snapshot(&self, ctx: &RequestContext, service: &str) -> Result<ServiceSnapshot> {
        let cache = with_deadline(
            self.config.io_timeout,
            "cache read",
            self.cache.read(&self.keys.counter(service)),
        )
        .await?;
        let durable = with_deadline(
            self.config.io_timeout,
            "durable fetch",
            self.store.fetch_state(&[service.to_string()]),
        )
        .await?
        .into_iter()
        .next();

        tracing::debug!(trace_id = %ctx, service, "Snapshot read");
        Ok(ServiceSnapshot {
            service_name: service.to_string(),
            cache,
            durable,
            active: self.registry.get(service).is_some(),
        })
    }

    /// Services with a live allocator in this process.
    pub fn services(&self) -> Vec<String> {
        self.registry.services()
    }

    /// Stops refill tasks, then drains and stops the sync pool. Each phase
    /// waits at most `wait` per task.
    pub async fn shutdown(&self, wait: Duration) {
        tracing::info!("Engine shutting down");
        self.registry.shutdown(wait).await;
        self.sync_pool.shutdown(wait).await;
        self.shutdown_token.cancel();
        tracing::info!("Engine stopped");
    }
}
