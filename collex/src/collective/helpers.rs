use crate::error::{CollexError, Result};
use crate::transport::{Channel, Endpoint};
use crate::types::Rank;
use std::future::Future;
use std::time::Duration;

/// Run `fut`, failing with `Timeout` if it outlives `timeout`.
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| CollexError::Timeout {
                operation,
                timeout_ms: limit.as_millis() as u64,
            })?,
    }
}

/// One collective's view of an endpoint: the channel it owns, its name for
/// error messages, and the per-message timeout.
pub(crate) struct Lane<'a, E: Endpoint> {
    pub ep: &'a E,
    pub channel: Channel,
    pub operation: &'static str,
    pub timeout: Option<Duration>,
}

impl<'a, E: Endpoint> Lane<'a, E> {
    pub fn new(ep: &'a E, seq: u64, operation: &'static str, timeout: Option<Duration>) -> Self {
        Self {
            ep,
            channel: Channel::Collective(seq),
            operation,
            timeout,
        }
    }

    pub fn rank(&self) -> Rank {
        self.ep.rank()
    }

    pub fn world(&self) -> u32 {
        self.ep.world_size()
    }

    fn wrap(&self, peer: Rank, e: CollexError) -> CollexError {
        match e {
            CollexError::Aborted => CollexError::Aborted,
            other => CollexError::CollectiveFailed {
                operation: self.operation,
                rank: peer,
                reason: other.to_string(),
            },
        }
    }

    /// Send bytes to a peer, wrapping errors as `CollectiveFailed`.
    pub async fn send(&self, dest: Rank, data: Vec<u8>) -> Result<()> {
        with_timeout(
            self.timeout,
            self.operation,
            self.ep.send(dest, self.channel, data),
        )
        .await
        .map_err(|e| self.wrap(dest, e))
    }

    /// Receive exactly `expected_len` bytes from a peer.
    pub async fn recv(&self, src: Rank, expected_len: usize) -> Result<Vec<u8>> {
        let envelope = with_timeout(
            self.timeout,
            self.operation,
            self.ep.recv(Some(src), self.channel),
        )
        .await
        .map_err(|e| self.wrap(src, e))?;
        if envelope.payload.len() != expected_len {
            return Err(CollexError::BufferSizeMismatch {
                expected: expected_len,
                actual: envelope.payload.len(),
            });
        }
        Ok(envelope.payload)
    }
}

/// Split `count` elements into `parts` contiguous chunks whose sizes differ by
/// at most one; the first `count % parts` chunks get the extra element.
pub(crate) struct ChunkLayout {
    pub offsets: Vec<usize>,
    counts: Vec<usize>,
}

impl ChunkLayout {
    pub fn new(count: usize, parts: usize) -> Self {
        let base = count / parts;
        let rem = count % parts;
        let counts: Vec<usize> = (0..parts).map(|i| base + usize::from(i < rem)).collect();
        let offsets = counts
            .iter()
            .scan(0, |acc, c| {
                let off = *acc;
                *acc += c;
                Some(off)
            })
            .collect();
        Self { offsets, counts }
    }

    pub fn chunk_count(&self, idx: usize) -> usize {
        self.counts[idx]
    }
}
