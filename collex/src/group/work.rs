use crate::buffer::Buffer;
use crate::error::{CollexError, Result};
use crate::types::{OpKind, Rank};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What a successful operation hands back.
#[derive(Debug, Default)]
pub(crate) struct WorkOutput {
    pub buffers: Vec<Buffer>,
    pub source_rank: Option<Rank>,
}

enum WorkState {
    Pending,
    Completed(WorkOutput),
    Failed(Arc<CollexError>),
}

struct WorkInner {
    seq: u64,
    kind: OpKind,
    state: Mutex<WorkState>,
    done: Condvar,
}

impl WorkInner {
    fn lock(&self) -> MutexGuard<'_, WorkState> {
        // The state is replaced in one assignment; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the outcome of one issued operation.
///
/// Returned by every operation-issuing method on
/// [`ProcessGroup`](crate::ProcessGroup) without blocking. The execution loop
/// is the only writer; callers block in [`wait`](Work::wait) until it has
/// moved the handle to a terminal state. Once terminal the outcome never
/// changes, so waiting again returns immediately with the same result.
/// Clones share the same outcome.
#[derive(Clone)]
pub struct Work {
    inner: Arc<WorkInner>,
}

/// The execution loop's half of a [`Work`]. Completing consumes it, so each
/// handle is written at most once. Dropping it unfinished fails the handle
/// with `Aborted` so no waiter is left hanging.
pub(crate) struct Completer {
    inner: Option<Arc<WorkInner>>,
}

pub(crate) fn pair(seq: u64, kind: OpKind) -> (Work, Completer) {
    let inner = Arc::new(WorkInner {
        seq,
        kind,
        state: Mutex::new(WorkState::Pending),
        done: Condvar::new(),
    });
    (
        Work {
            inner: Arc::clone(&inner),
        },
        Completer { inner: Some(inner) },
    )
}

impl Completer {
    pub fn complete(mut self, outcome: Result<WorkOutput>) {
        if let Some(inner) = self.inner.take() {
            finish(&inner, outcome);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            finish(&inner, Err(CollexError::Aborted));
        }
    }
}

fn finish(inner: &WorkInner, outcome: Result<WorkOutput>) {
    let mut state = inner.lock();
    *state = match outcome {
        Ok(output) => WorkState::Completed(output),
        Err(e) => WorkState::Failed(Arc::new(e)),
    };
    drop(state);
    inner.done.notify_all();
}

impl Work {
    /// Issue-order sequence number on this process.
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    pub fn kind(&self) -> OpKind {
        self.inner.kind
    }

    pub fn is_completed(&self) -> bool {
        !matches!(*self.inner.lock(), WorkState::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(*self.inner.lock(), WorkState::Completed(_))
    }

    /// The captured error, once the operation has failed.
    pub fn exception(&self) -> Option<Arc<CollexError>> {
        match &*self.inner.lock() {
            WorkState::Failed(e) => Some(Arc::clone(e)),
            _ => None,
        }
    }

    /// Block until the operation completes. Fails with `WorkFailed` carrying
    /// the captured error if it did not succeed.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.lock();
        while matches!(*state, WorkState::Pending) {
            state = self
                .inner
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.outcome(&state)
    }

    /// Like [`wait`](Work::wait) but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` if the operation is still pending when the time
    /// runs out. A timeout too large to represent waits without bound.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait().map(|()| true);
        };
        let mut state = self.inner.lock();
        while matches!(*state, WorkState::Pending) {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .inner
                .done
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        self.outcome(&state).map(|()| true)
    }

    /// Output buffers of a successfully completed operation.
    ///
    /// AllReduce, Broadcast, Reduce, Scatter, Recv and RecvAnySource yield one
    /// buffer; AllGather yields one per rank, as does Gather on its root.
    /// Send, Barrier and Gather on a non-root rank yield none.
    pub fn result(&self) -> Result<Vec<Buffer>> {
        match &*self.inner.lock() {
            WorkState::Completed(out) => Ok(out.buffers.clone()),
            WorkState::Pending => Err(self.pending()),
            WorkState::Failed(e) => Err(self.failed(e)),
        }
    }

    /// Rank a `recv_any_source` operation received from.
    pub fn source_rank(&self) -> Result<Rank> {
        match &*self.inner.lock() {
            WorkState::Completed(out) => out.source_rank.ok_or(CollexError::NoSourceRank {
                seq: self.inner.seq,
                operation: self.inner.kind,
            }),
            WorkState::Pending => Err(self.pending()),
            WorkState::Failed(e) => Err(self.failed(e)),
        }
    }

    fn outcome(&self, state: &WorkState) -> Result<()> {
        match state {
            WorkState::Failed(e) => Err(self.failed(e)),
            _ => Ok(()),
        }
    }

    fn pending(&self) -> CollexError {
        CollexError::WorkPending {
            seq: self.inner.seq,
            operation: self.inner.kind,
        }
    }

    fn failed(&self, e: &Arc<CollexError>) -> CollexError {
        CollexError::WorkFailed {
            seq: self.inner.seq,
            operation: self.inner.kind,
            source: Arc::clone(e),
        }
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match &*self.inner.lock() {
            WorkState::Pending => "pending",
            WorkState::Completed(_) => "completed",
            WorkState::Failed(_) => "failed",
        };
        f.debug_struct("Work")
            .field("seq", &self.inner.seq)
            .field("kind", &self.inner.kind)
            .field("status", &status)
            .finish()
    }
}
