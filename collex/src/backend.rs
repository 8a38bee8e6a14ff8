//! The narrow interface a [`ProcessGroup`](crate::ProcessGroup) drives.
//!
//! One method per operation kind. The engine never looks below this trait,
//! so tests can swap in a fake that injects latency or failures.

use crate::buffer::Buffer;
use crate::collective::{self, Lane, helpers::with_timeout};
use crate::error::{CollexError, Result};
use crate::transport::{Channel, Endpoint, LocalEndpoint, TcpEndpoint};
use crate::types::{Rank, ReduceOp, Tag};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Executes one operation of each kind against the other ranks.
///
/// Buffers are passed by value and handed back once the operation completes.
/// Every method is called from a single execution loop, in issue order.
pub trait Transport: Send + Sync + 'static {
    fn rank(&self) -> Rank;

    fn size(&self) -> u32;

    /// Fixed identifier of this backend, e.g. `"tcp"`.
    fn backend_name(&self) -> &'static str;

    fn all_reduce(&self, buffer: Buffer, op: ReduceOp) -> BoxFuture<'_, Result<Buffer>>;

    fn broadcast(&self, buffer: Buffer, root: Rank) -> BoxFuture<'_, Result<Buffer>>;

    /// Only the root's returned buffer holds the reduction.
    fn reduce(&self, buffer: Buffer, op: ReduceOp, root: Rank) -> BoxFuture<'_, Result<Buffer>>;

    fn all_gather(&self, input: Buffer, outputs: Vec<Buffer>)
    -> BoxFuture<'_, Result<Vec<Buffer>>>;

    /// `outputs` is empty on non-root ranks, and so is the result.
    fn gather(
        &self,
        input: Buffer,
        outputs: Vec<Buffer>,
        root: Rank,
    ) -> BoxFuture<'_, Result<Vec<Buffer>>>;

    /// `inputs` is empty on non-root ranks.
    fn scatter(
        &self,
        output: Buffer,
        inputs: Vec<Buffer>,
        root: Rank,
    ) -> BoxFuture<'_, Result<Buffer>>;

    fn send(&self, buffer: Buffer, dest: Rank, tag: Tag) -> BoxFuture<'_, Result<()>>;

    fn recv(&self, buffer: Buffer, src: Rank, tag: Tag) -> BoxFuture<'_, Result<Buffer>>;

    /// Receive on `tag` from whichever rank sent first; returns that rank.
    fn recv_any_source(&self, buffer: Buffer, tag: Tag) -> BoxFuture<'_, Result<(Rank, Buffer)>>;

    fn barrier(&self) -> BoxFuture<'_, Result<()>>;

    /// Tear down the connection to every peer. In-flight operations fail.
    fn close(&self);
}

/// [`Transport`] over a point-to-point [`Endpoint`] mesh, running the
/// collective algorithms in [`crate::collective`].
pub struct MeshTransport<E: Endpoint> {
    ep: E,
    /// Sequence number of the next collective. Identical on every rank as
    /// long as all ranks issue collectives in the same order.
    next_collective: AtomicU64,
    op_timeout: Option<Duration>,
}

/// In-process backend.
pub type LocalTransport = MeshTransport<LocalEndpoint>;

/// Multi-process backend.
pub type TcpTransport = MeshTransport<TcpEndpoint>;

impl<E: Endpoint> MeshTransport<E> {
    pub fn new(ep: E, op_timeout: Option<Duration>) -> Self {
        Self {
            ep,
            next_collective: AtomicU64::new(0),
            op_timeout,
        }
    }

    fn lane(&self, operation: &'static str) -> Lane<'_, E> {
        let seq = self.next_collective.fetch_add(1, Ordering::Relaxed);
        Lane::new(&self.ep, seq, operation, self.op_timeout)
    }
}

impl MeshTransport<LocalEndpoint> {
    /// One transport per rank of a fresh in-process mesh.
    pub fn local_mesh(world_size: u32, op_timeout: Option<Duration>) -> Vec<Self> {
        LocalEndpoint::mesh(world_size)
            .into_iter()
            .map(|ep| Self::new(ep, op_timeout))
            .collect()
    }
}

fn check_root(root: Rank, world_size: u32) -> Result<()> {
    if root >= world_size {
        return Err(CollexError::InvalidRank {
            rank: root,
            world_size,
        });
    }
    Ok(())
}

impl<E: Endpoint> Transport for MeshTransport<E> {
    fn rank(&self) -> Rank {
        self.ep.rank()
    }

    fn size(&self) -> u32 {
        self.ep.world_size()
    }

    fn backend_name(&self) -> &'static str {
        E::BACKEND
    }

    fn all_reduce(&self, mut buffer: Buffer, op: ReduceOp) -> BoxFuture<'_, Result<Buffer>> {
        Box::pin(async move {
            let lane = self.lane("allreduce");
            let dtype = buffer.dtype();
            collective::ring_allreduce(&lane, buffer.as_bytes_mut(), dtype, op).await?;
            Ok(buffer)
        })
    }

    fn broadcast(&self, mut buffer: Buffer, root: Rank) -> BoxFuture<'_, Result<Buffer>> {
        Box::pin(async move {
            check_root(root, self.size())?;
            let lane = self.lane("broadcast");
            let mut bytes = buffer.as_bytes().to_vec();
            collective::tree_broadcast(&lane, &mut bytes, root).await?;
            buffer.fill_from(bytes)?;
            Ok(buffer)
        })
    }

    fn reduce(&self, mut buffer: Buffer, op: ReduceOp, root: Rank) -> BoxFuture<'_, Result<Buffer>> {
        Box::pin(async move {
            check_root(root, self.size())?;
            let lane = self.lane("reduce");
            let dtype = buffer.dtype();
            collective::tree_reduce(&lane, buffer.as_bytes_mut(), dtype, op, root).await?;
            Ok(buffer)
        })
    }

    fn all_gather(
        &self,
        input: Buffer,
        mut outputs: Vec<Buffer>,
    ) -> BoxFuture<'_, Result<Vec<Buffer>>> {
        Box::pin(async move {
            let lane = self.lane("allgather");
            let slots = collective::ring_allgather(&lane, input.as_bytes()).await?;
            fill_slots("allgather", &mut outputs, slots)?;
            Ok(outputs)
        })
    }

    fn gather(
        &self,
        input: Buffer,
        mut outputs: Vec<Buffer>,
        root: Rank,
    ) -> BoxFuture<'_, Result<Vec<Buffer>>> {
        Box::pin(async move {
            check_root(root, self.size())?;
            let lane = self.lane("gather");
            let slots = collective::gather(&lane, input.as_bytes(), root).await?;
            if self.rank() != root {
                return Ok(Vec::new());
            }
            fill_slots("gather", &mut outputs, slots)?;
            Ok(outputs)
        })
    }

    fn scatter(
        &self,
        mut output: Buffer,
        inputs: Vec<Buffer>,
        root: Rank,
    ) -> BoxFuture<'_, Result<Buffer>> {
        Box::pin(async move {
            check_root(root, self.size())?;
            let lane = self.lane("scatter");
            let chunks = inputs.into_iter().map(Buffer::into_bytes).collect();
            let chunk = collective::scatter(&lane, chunks, output.byte_len(), root).await?;
            output.fill_from(chunk)?;
            Ok(output)
        })
    }

    fn send(&self, buffer: Buffer, dest: Rank, tag: Tag) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            with_timeout(
                self.op_timeout,
                "send",
                self.ep.send(dest, Channel::Tagged(tag), buffer.into_bytes()),
            )
            .await
        })
    }

    fn recv(&self, mut buffer: Buffer, src: Rank, tag: Tag) -> BoxFuture<'_, Result<Buffer>> {
        Box::pin(async move {
            let envelope = with_timeout(
                self.op_timeout,
                "recv",
                self.ep.recv(Some(src), Channel::Tagged(tag)),
            )
            .await?;
            buffer.fill_from(envelope.payload)?;
            Ok(buffer)
        })
    }

    fn recv_any_source(
        &self,
        mut buffer: Buffer,
        tag: Tag,
    ) -> BoxFuture<'_, Result<(Rank, Buffer)>> {
        Box::pin(async move {
            let envelope = with_timeout(
                self.op_timeout,
                "recv_any_source",
                self.ep.recv(None, Channel::Tagged(tag)),
            )
            .await?;
            buffer.fill_from(envelope.payload)?;
            Ok((envelope.src, buffer))
        })
    }

    fn barrier(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let lane = self.lane("barrier");
            collective::barrier(&lane).await
        })
    }

    fn close(&self) {
        self.ep.close();
    }
}

fn fill_slots(operation: &'static str, outputs: &mut [Buffer], slots: Vec<Vec<u8>>) -> Result<()> {
    if outputs.len() != slots.len() {
        return Err(CollexError::BufferCount {
            operation,
            expected: slots.len(),
            actual: outputs.len(),
        });
    }
    for (out, bytes) in outputs.iter_mut().zip(slots) {
        out.fill_from(bytes)?;
    }
    Ok(())
}
