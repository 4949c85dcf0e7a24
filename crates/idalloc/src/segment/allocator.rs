use super::refill::refill_loop;
use crate::{Error, Result, Segment, config::EngineConfig, issuer::BatchIssuer};
use core::{fmt, time::Duration};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

struct Cursor {
    current: Segment,
    /// Resolves with the segment the refill task is preparing. `None` once the
    /// task has gone away.
    next: Option<oneshot::Receiver<Segment>>,
    demand: mpsc::Sender<oneshot::Sender<Segment>>,
}

impl Cursor {
    /// Waits up to `wait` for the pre-fetched segment and asks the refill task
    /// for the one after it.
    ///
    /// A timeout leaves the pending receiver in place, so a segment that
    /// arrives late is picked up by the next caller rather than lost.
    async fn next_segment(&mut self, service: &str, wait: Duration) -> Result<Segment> {
        let Some(next) = self.next.as_mut() else {
            return Err(Error::ServiceStopped);
        };

        match timeout(wait, next).await {
            Err(_) => Err(Error::Busy {
                service: service.to_string(),
            }),
            Ok(Err(_)) => {
                self.next = None;
                Err(Error::ServiceStopped)
            }
            Ok(Ok(segment)) => {
                let (tx, rx) = oneshot::channel();
                self.next = self.demand.try_send(tx).ok().map(|()| rx);
                Ok(segment)
            }
        }
    }
}

/// Hands out IDs for a single service from an in-memory segment.
///
/// Calls are mutually exclusive per service, so the IDs returned by
/// consecutive calls are strictly increasing. The fast path touches no I/O;
/// only an exhausted segment waits on the background refill task.
pub struct SegmentAllocator {
    service: String,
    batch_size: i64,
    refill_wait: Duration,
    cursor: Mutex<Cursor>,
}

impl fmt::Debug for SegmentAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentAllocator")
            .field("service", &self.service)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl SegmentAllocator {
    /// Builds an allocator seeded with `seed` and spawns its refill task.
    ///
    /// The returned handle completes once the refill task has exited, which
    /// happens when `shutdown` is cancelled.
    pub fn spawn(
        service: impl Into<String>,
        seed: Segment,
        issuer: Arc<BatchIssuer>,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let service = service.into();
        let (demand_tx, demand_rx) = mpsc::channel(1);
        let (pending_tx, pending_rx) = oneshot::channel();

        let handle = tokio::spawn(refill_loop(
            service.clone(),
            issuer,
            pending_tx,
            demand_rx,
            shutdown,
            config.refill_retry_delay,
        ));

        let allocator = Arc::new(Self {
            service,
            batch_size: config.batch_size,
            refill_wait: config.refill_wait,
            cursor: Mutex::new(Cursor {
                current: seed,
                next: Some(pending_rx),
                demand: demand_tx,
            }),
        });

        (allocator, handle)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns `count` distinct, increasing IDs.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `count` is not within `1..=batch_size`.
    /// - [`Error::Busy`] if the segment is exhausted and no replacement
    ///   arrived within the refill wait. Nothing is consumed in that case.
    /// - [`Error::ServiceStopped`] if the refill task has shut down.
    pub async fn allocate(&self, count: i64) -> Result<Vec<i64>> {
        if count < 1 || count > self.batch_size {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "count must be between 1 and {} (got {count})",
                    self.batch_size
                ),
            });
        }

        let mut cursor = self.cursor.lock().await;
        let mut ids = Vec::with_capacity(count as usize);

        if cursor.current.remaining() >= count {
            cursor.current.take_into(count, &mut ids);
            return Ok(ids);
        }

        let mut next = cursor
            .next_segment(&self.service, self.refill_wait)
            .await?;
        tracing::debug!(
            service = %self.service,
            last_alloc_value = next.last_alloc_value,
            max_value = next.max_value,
            "Switched to pre-fetched segment"
        );

        let taken = cursor.current.take_into(count, &mut ids);
        next.take_into(count - taken, &mut ids);
        cursor.current = next;

        Ok(ids)
    }

    /// Snapshot of the segment currently being served.
    pub async fn current_segment(&self) -> Segment {
        self.cursor.lock().await.current
    }
}
