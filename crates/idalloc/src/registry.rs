//! Service name to allocator mapping.
//!
//! [`AllocatorRegistry`] creates one [`SegmentAllocator`] per service for the
//! lifetime of the process. Lookups of known services take a shared read lock
//! only; creation is serialized and double-checked so concurrent first
//! requests for the same service end up with the same instance.

use crate::{
    Error, RequestContext, Result, config::EngineConfig, issuer::BatchIssuer,
    segment::SegmentAllocator,
};
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

pub struct AllocatorRegistry {
    allocators: RwLock<HashMap<String, Arc<SegmentAllocator>>>,
    creation: tokio::sync::Mutex<()>,
    refill_tasks: Mutex<Vec<JoinHandle<()>>>,
    issuer: Arc<BatchIssuer>,
    config: EngineConfig,
    shutdown_token: CancellationToken,
}

impl AllocatorRegistry {
    pub fn new(issuer: Arc<BatchIssuer>, config: EngineConfig, shutdown_token: CancellationToken) -> Self {
        Self {
            allocators: RwLock::new(HashMap::new()),
            creation: tokio::sync::Mutex::new(()),
            refill_tasks: Mutex::new(Vec::new()),
            issuer,
            config,
            shutdown_token,
        }
    }

    pub fn get(&self, service: &str) -> Option<Arc<SegmentAllocator>> {
        self.allocators.read().get(service).cloned()
    }

    /// Returns the allocator for `service`, creating it on first use.
    ///
    /// Creation performs one synchronous batch reservation to seed the first
    /// segment, so the first request for a new service pays one cache-tier
    /// round trip.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceStopped`] once shutdown has begun.
    /// - Any error from the seed reservation.
    pub async fn get_or_create(
        &self,
        ctx: &RequestContext,
        service: &str,
    ) -> Result<Arc<SegmentAllocator>> {
        if let Some(allocator) = self.get(service) {
            return Ok(allocator);
        }

        let _creating = self.creation.lock().await;
        if let Some(allocator) = self.get(service) {
            return Ok(allocator);
        }
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceStopped);
        }

        let seed = self.issuer.reserve(ctx, service).await?;
        let (allocator, handle) = SegmentAllocator::spawn(
            service,
            seed,
            Arc::clone(&self.issuer),
            &self.config,
            self.shutdown_token.child_token(),
        );
        self.refill_tasks.lock().push(handle);
        self.allocators
            .write()
            .insert(service.to_string(), Arc::clone(&allocator));

        tracing::info!(
            trace_id = %ctx,
            service,
            last_alloc_value = seed.last_alloc_value,
            max_value = seed.max_value,
            "Created allocator"
        );
        Ok(allocator)
    }

    /// Names of all services with a live allocator.
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<_> = self.allocators.read().keys().cloned().collect();
        services.sort_unstable();
        services
    }

    /// Stops every refill task and waits (up to `wait` per task) for them to
    /// exit. Allocators keep serving what is left in their current segment.
    pub async fn shutdown(&self, wait: Duration) {
        tracing::debug!("Stopping refill tasks");
        // Taking the creation lock ensures no allocator is half-built.
        let _creating = self.creation.lock().await;
        self.shutdown_token.cancel();

        let handles = core::mem::take(&mut *self.refill_tasks.lock());
        let count = handles.len();
        let waits = handles.into_iter().map(|handle| async move {
            match timeout(wait, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Refill task failed: {e}"),
                Err(_) => tracing::warn!("Refill task did not stop within {wait:?}"),
            }
        });
        futures::future::join_all(waits).await;

        tracing::info!("Stopped {count} refill tasks");
    }
}
