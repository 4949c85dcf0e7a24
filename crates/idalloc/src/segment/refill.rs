use crate::{RequestContext, Segment, issuer::BatchIssuer};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Background producer that keeps exactly one segment ready for its
/// allocator.
///
/// The hand-off is a rendezvous: the task reserves a segment, resolves the
/// pending `oneshot`, and then waits for the allocator to ask again (by
/// sending a fresh `oneshot::Sender` over `demand`) before reserving the next
/// one. It therefore never runs more than one segment ahead.
///
/// Failed reservations are logged and retried after `retry_delay`. The task
/// exits when `shutdown` is cancelled or when its allocator is dropped; either
/// way the pending sender is dropped, which the allocator observes as a
/// stopped service.
pub async fn refill_loop(
    service: String,
    issuer: Arc<BatchIssuer>,
    mut pending: oneshot::Sender<Segment>,
    mut demand: mpsc::Receiver<oneshot::Sender<Segment>>,
    shutdown: CancellationToken,
    retry_delay: Duration,
) {
    let ctx = RequestContext::background(format_args!("refill-{service}"));
    tracing::debug!(trace_id = %ctx, service = %service, "Refill task started");

    loop {
        let segment = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            segment = reserve_until_ok(&ctx, &issuer, &service, retry_delay) => segment,
        };

        if pending.send(segment).is_err() {
            tracing::debug!(trace_id = %ctx, service = %service, "Allocator dropped, discarding segment");
            break;
        }

        pending = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            next = demand.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
    }

    tracing::debug!(trace_id = %ctx, service = %service, "Refill task stopped");
}

async fn reserve_until_ok(
    ctx: &RequestContext,
    issuer: &BatchIssuer,
    service: &str,
    retry_delay: Duration,
) -> Segment {
    loop {
        match issuer.reserve(ctx, service).await {
            Ok(segment) => return segment,
            Err(e) if e.is_critical() => {
                tracing::error!(trace_id = %ctx, service, error = %e, "Refill reservation failed, cache counter needs repair");
            }
            Err(e) => {
                tracing::warn!(trace_id = %ctx, service, error = %e, "Refill reservation failed, retrying");
            }
        }
        tokio::time::sleep(retry_delay).await;
    }
}
