use super::synchronizer::Synchronizer;
use crate::{RequestContext, SyncItem};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Receiving half of the sync channel, shared by every worker in the pool.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<SyncItem>>>;

/// Worker task draining the shared sync channel.
///
/// Each worker takes one [`SyncItem`] at a time and hands it to the
/// [`Synchronizer`], which never fails, so a bad item cannot take the worker
/// down.
///
/// # Shutdown
///
/// Once `shutdown` is cancelled the channel is closed to new sends, but items
/// already queued are still processed. The worker exits when the channel is
/// both closed and empty.
pub async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    synchronizer: Arc<Synchronizer>,
    shutdown: CancellationToken,
) {
    let ctx = RequestContext::background(format_args!("sync-{worker_id}"));
    tracing::trace!("Worker {worker_id} started");

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                item = rx.recv() => item,
                () = shutdown.cancelled() => {
                    rx.close();
                    rx.recv().await
                }
            }
        };

        match next {
            Some(item) => synchronizer.process(&ctx, item).await,
            None => break,
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
