use crate::backend::Transport;
use crate::error::CollexError;
use crate::group::abort::AbortSignal;
use crate::group::op::Op;
use crate::group::work::Completer;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// An operation waiting in the queue, with the handle it completes.
pub(crate) struct Queued {
    pub seq: u64,
    pub op: Op,
    pub completer: Completer,
}

/// The execution loop: runs queued operations one at a time, in issue order.
///
/// Exits when the queue's sender is dropped (shutdown, after draining what
/// was already queued) or when the group aborts. A failed operation captures
/// its error on the Work and then aborts the group; anything still queued at
/// that point fails with `Aborted`.
pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    abort: Arc<AbortSignal>,
    mut queue: mpsc::UnboundedReceiver<Queued>,
) {
    let mut aborted = abort.subscribe();
    let rank = transport.rank();

    loop {
        let job = tokio::select! {
            biased;
            _ = wait_aborted(&mut aborted) => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let Queued { seq, op, completer } = job;
        let kind = op.kind();
        tracing::debug!(rank, seq, op = %kind, "executing");

        let outcome = tokio::select! {
            biased;
            _ = wait_aborted(&mut aborted) => Err(CollexError::Aborted),
            outcome = op.execute(transport.as_ref()) => outcome,
        };

        match outcome {
            Ok(output) => {
                tracing::debug!(rank, seq, op = %kind, "completed");
                completer.complete(Ok(output));
            }
            Err(CollexError::Aborted) => {
                tracing::debug!(rank, seq, op = %kind, "dropped by abort");
                completer.complete(Err(CollexError::Aborted));
            }
            Err(e) => {
                tracing::error!(rank, seq, op = %kind, error = %e, "operation failed");
                // Abort before completing so a waiter that sees the failure
                // also sees the aborted group.
                abort.abort(&format!("work #{seq} ({kind}) failed: {e}"));
                completer.complete(Err(e));
            }
        }
    }

    queue.close();
    let mut dropped = 0usize;
    while let Ok(job) = queue.try_recv() {
        job.completer.complete(Err(CollexError::Aborted));
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(rank, dropped, "failed queued operations after abort");
    }
    tracing::debug!(rank, "execution loop stopped");
}

async fn wait_aborted(rx: &mut watch::Receiver<bool>) {
    // The sender outlives the loop.
    let _ = rx.wait_for(|aborted| *aborted).await;
}
