use crate::backend::Transport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Group-wide terminal state, shared by the issuing side and the execution loop.
///
/// Aborting is one-way: it flips the flag, wakes the loop so the in-flight
/// operation is dropped, and closes the transport so peers blocked on this
/// rank fail too.
pub(crate) struct AbortSignal {
    transport: Arc<dyn Transport>,
    aborted: AtomicBool,
    tx: watch::Sender<bool>,
}

impl AbortSignal {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            transport,
            aborted: AtomicBool::new(false),
            tx,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that actually aborted the group.
    pub fn abort(&self, reason: &str) -> bool {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::warn!(
            rank = self.transport.rank(),
            backend = self.transport.backend_name(),
            reason,
            "aborting process group"
        );
        self.tx.send_replace(true);
        self.transport.close();
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
