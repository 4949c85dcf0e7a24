//! Fixed-size pool of synchronization workers.
//!
//! This module defines the [`SyncPool`] struct, which owns the bounded work
//! channel fed by the batch issuer and a set of workers that drain it. All
//! workers share one receiver, so whichever worker is idle picks up the next
//! item.

use super::{synchronizer::Synchronizer, worker::worker_loop};
use crate::SyncItem;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

pub struct SyncPool {
    sender: mpsc::Sender<SyncItem>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl SyncPool {
    /// Creates the bounded channel and spawns `num_workers` workers on the
    /// current Tokio runtime.
    pub fn spawn(
        synchronizer: Arc<Synchronizer>,
        num_workers: usize,
        channel_size: usize,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (sender, rx) = mpsc::channel(channel_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..num_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&synchronizer),
                    shutdown_token.clone(),
                ))
            })
            .collect();

        Self {
            sender,
            workers: Mutex::new(workers),
            shutdown_token,
        }
    }

    /// Returns a producer handle for the work channel.
    pub fn sender(&self) -> mpsc::Sender<SyncItem> {
        self.sender.clone()
    }

    /// Gracefully shuts down all workers.
    ///
    /// - Cancels the shared [`CancellationToken`], which closes the channel.
    /// - Lets every worker drain the items already queued.
    /// - Waits (up to `wait` per worker) for each worker to exit.
    pub async fn shutdown(&self, wait: Duration) {
        tracing::debug!("Signalling sync workers to drain and stop");
        self.shutdown_token.cancel();

        let handles = core::mem::take(&mut *self.workers.lock());
        let waits = handles.into_iter().enumerate().map(|(i, handle)| async move {
            match timeout(wait, handle).await {
                Ok(Ok(())) => tracing::trace!("Sync worker {i} exited"),
                Ok(Err(e)) => tracing::error!("Sync worker {i} failed: {e}"),
                Err(_) => tracing::warn!("Sync worker {i} did not drain within {wait:?}"),
            }
        });
        futures::future::join_all(waits).await;

        tracing::info!("Sync pool shutdown complete");
    }
}
