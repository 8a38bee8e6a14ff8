//! The collective engine: issue operations, get [`Work`] handles back.

mod abort;
mod op;
mod work;
mod worker;

pub use work::Work;

use crate::backend::{LocalTransport, TcpTransport, Transport};
use crate::bootstrap::LaunchInfo;
use crate::buffer::Buffer;
use crate::config::GroupConfig;
use crate::error::{CollexError, Result};
use crate::transport::TcpEndpoint;
use crate::types::{Rank, ReduceOp, Tag};
use abort::AbortSignal;
use op::Op;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use worker::Queued;

/// Issuing side of the queue. Holding the lock while assigning a sequence
/// number and enqueueing keeps queue order equal to sequence order.
struct Issuer {
    tx: Option<mpsc::UnboundedSender<Queued>>,
    next_seq: u64,
}

/// One rank's membership in a group of cooperating processes.
///
/// Every operation method validates its arguments, moves the buffers into
/// a queued descriptor and returns a [`Work`] without blocking. A dedicated
/// worker thread executes queued operations one by one, in issue order,
/// against the group's [`Transport`].
///
/// Collectives are matched positionally: every rank must issue the same
/// collectives in the same relative order. Send and receive are matched by
/// peer rank and tag.
///
/// Any operation that fails at the transport aborts the whole group: the
/// failed Work carries the error, every queued operation fails with
/// `Aborted`, and later issuance is refused.
///
/// ```no_run
/// use collex::{Buffer, GroupConfig, ProcessGroup, ReduceOp};
///
/// let groups = ProcessGroup::local(2, GroupConfig::default())?;
/// let works = groups
///     .iter()
///     .map(|pg| pg.allreduce(Buffer::full(&[16, 16], 1.0f32), ReduceOp::Sum))
///     .collect::<collex::Result<Vec<_>>>()?;
/// for (pg, work) in groups.iter().zip(&works) {
///     let out = pg.wait_all(std::slice::from_ref(work))?;
///     assert!(out[0][0].all_eq(2.0f32)?);
/// }
/// # Ok::<(), collex::CollexError>(())
/// ```
pub struct ProcessGroup {
    rank: Rank,
    size: u32,
    backend: &'static str,
    config: GroupConfig,
    transport: Arc<dyn Transport>,
    abort: Arc<AbortSignal>,
    issuer: Mutex<Issuer>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    runtime: Option<Runtime>,
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("collex-io")
        .enable_all()
        .build()
        .map_err(|e| CollexError::transport(format!("tokio runtime: {e}")))
}

impl ProcessGroup {
    /// Start a group over `transport` on a runtime of its own.
    pub fn new(transport: impl Transport, config: GroupConfig) -> Result<Self> {
        Self::with_runtime(Arc::new(transport), config, build_runtime()?)
    }

    /// Start a group on `runtime`, which must be the runtime the transport's
    /// background tasks were spawned on. The group takes ownership of it.
    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        config: GroupConfig,
        runtime: Runtime,
    ) -> Result<Self> {
        let rank = transport.rank();
        let size = transport.size();
        let backend = transport.backend_name();
        let abort = Arc::new(AbortSignal::new(Arc::clone(&transport)));
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = runtime.handle().clone();
        let loop_transport = Arc::clone(&transport);
        let loop_abort = Arc::clone(&abort);
        let worker = thread::Builder::new()
            .name(format!("collex-worker-{rank}"))
            .spawn(move || handle.block_on(worker::run(loop_transport, loop_abort, rx)))?;

        tracing::debug!(rank, size, backend, "process group started");

        Ok(Self {
            rank,
            size,
            backend,
            config,
            transport,
            abort,
            issuer: Mutex::new(Issuer {
                tx: Some(tx),
                next_seq: 0,
            }),
            worker: Mutex::new(Some(worker)),
            runtime: Some(runtime),
        })
    }

    /// An in-process group of `world_size` ranks, returned in rank order.
    pub fn local(world_size: u32, config: GroupConfig) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(CollexError::invalid("local", "world size must be at least 1"));
        }
        LocalTransport::local_mesh(world_size, config.op_timeout)
            .into_iter()
            .map(|t| Self::new(t, config.clone()))
            .collect()
    }

    /// Join a TCP group as `rank`. Blocks until every peer is connected or
    /// `config.connect_timeout` passes.
    pub fn connect_tcp(rank: Rank, world_size: u32, config: GroupConfig) -> Result<Self> {
        if rank >= world_size {
            return Err(CollexError::InvalidRank { rank, world_size });
        }
        let addrs = config.peer_addrs(world_size)?;
        let runtime = build_runtime()?;
        let ep = runtime.block_on(TcpEndpoint::connect_mesh(
            rank,
            &addrs,
            config.connect_timeout,
        ))?;
        let transport: TcpTransport = TcpTransport::new(ep, config.op_timeout);
        Self::with_runtime(Arc::new(transport), config, runtime)
    }

    /// Join the TCP group described by the launcher environment
    /// (see [`LaunchInfo::from_env`]).
    pub fn from_env(config: GroupConfig) -> Result<Self> {
        let info = LaunchInfo::from_env()?.ok_or_else(|| {
            CollexError::Bootstrap("no launcher environment detected".into())
        })?;
        Self::connect_tcp(info.rank, info.world_size, config)
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Name of the transport backend, e.g. `"local"` or `"tcp"`.
    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    fn lock_issuer(&self) -> MutexGuard<'_, Issuer> {
        // Nothing panics while the issuer lock is held.
        self.issuer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, op: Op) -> Result<Work> {
        if self.abort.is_aborted() {
            return Err(CollexError::Aborted);
        }
        op.validate(self.rank, self.size)?;

        let mut issuer = self.lock_issuer();
        let Some(tx) = issuer.tx.as_ref() else {
            return Err(CollexError::ShutDown);
        };
        let seq = issuer.next_seq;
        let kind = op.kind();
        let (work, completer) = work::pair(seq, kind);
        if tx.send(Queued { seq, op, completer }).is_err() {
            // The loop has exited, which only happens on shutdown or abort.
            return Err(if self.abort.is_aborted() {
                CollexError::Aborted
            } else {
                CollexError::ShutDown
            });
        }
        issuer.next_seq += 1;
        tracing::trace!(rank = self.rank, seq, op = %kind, "queued");
        Ok(work)
    }

    /// Element-wise reduction of `buffer` across all ranks; every rank's
    /// result holds the reduced values.
    pub fn allreduce(&self, buffer: Buffer, op: ReduceOp) -> Result<Work> {
        self.issue(Op::AllReduce { buffer, op })
    }

    /// Every rank's result is `root`'s `buffer`. Non-root contents are
    /// overwritten.
    pub fn broadcast(&self, buffer: Buffer, root: Rank) -> Result<Work> {
        self.issue(Op::Broadcast { buffer, root })
    }

    /// Reduction of every rank's `buffer`, delivered to `root` only. Other
    /// ranks get their own input back.
    pub fn reduce(&self, buffer: Buffer, op: ReduceOp, root: Rank) -> Result<Work> {
        self.issue(Op::Reduce { buffer, op, root })
    }

    /// `outputs` must hold `size()` buffers laid out like `input`. The result
    /// holds them filled, slot `r` with rank `r`'s input.
    pub fn allgather(&self, outputs: Vec<Buffer>, input: Buffer) -> Result<Work> {
        self.issue(Op::AllGather { input, outputs })
    }

    /// Like [`allgather`](Self::allgather) but only `root` receives. Non-root
    /// ranks pass no outputs and get an empty result.
    pub fn gather(&self, outputs: Vec<Buffer>, input: Buffer, root: Rank) -> Result<Work> {
        self.issue(Op::Gather {
            input,
            outputs,
            root,
        })
    }

    /// `root` passes `size()` inputs laid out like `output`; rank `r`'s result
    /// is input slot `r`. Non-root ranks pass no inputs.
    pub fn scatter(&self, output: Buffer, inputs: Vec<Buffer>, root: Rank) -> Result<Work> {
        self.issue(Op::Scatter {
            output,
            inputs,
            root,
        })
    }

    pub fn send(&self, buffer: Buffer, dest: Rank, tag: Tag) -> Result<Work> {
        self.issue(Op::Send { buffer, dest, tag })
    }

    /// Receive into a buffer laid out like `buffer` from `src` on `tag`.
    pub fn recv(&self, buffer: Buffer, src: Rank, tag: Tag) -> Result<Work> {
        self.issue(Op::Recv { buffer, src, tag })
    }

    /// Receive on `tag` from whichever rank sends first. The sender is
    /// available from [`Work::source_rank`] once complete.
    pub fn recv_any_source(&self, buffer: Buffer, tag: Tag) -> Result<Work> {
        self.issue(Op::RecvAnySource { buffer, tag })
    }

    /// Completes on every rank once all ranks have entered it.
    pub fn barrier(&self) -> Result<Work> {
        self.issue(Op::Barrier)
    }

    /// Tear down the group. Idempotent.
    pub fn abort(&self) {
        self.abort.abort("requested by caller");
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Wait on every handle in order and collect their results.
    ///
    /// On the first failure (or when `config.wait_timeout` expires) the group
    /// is aborted before the error is returned, so the failure reaches every
    /// rank even if the execution loop did not abort on its own.
    pub fn wait_all(&self, works: &[Work]) -> Result<Vec<Vec<Buffer>>> {
        let mut results = Vec::with_capacity(works.len());
        for work in works {
            match self.wait_one(work).and_then(|()| work.result()) {
                Ok(buffers) => results.push(buffers),
                Err(e) => {
                    tracing::error!(rank = self.rank, seq = work.seq(), error = %e, "wait failed");
                    self.abort.abort(&format!("wait on work #{} failed", work.seq()));
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    fn wait_one(&self, work: &Work) -> Result<()> {
        let Some(limit) = self.config.wait_timeout else {
            return work.wait();
        };
        if work.wait_timeout(limit)? {
            Ok(())
        } else {
            Err(CollexError::Timeout {
                operation: "wait_all",
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }

    /// Stop accepting operations, let the worker finish what is queued, then
    /// close the transport. Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        let tx = self.lock_issuer().tx.take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            tracing::error!(rank = self.rank, "worker thread panicked");
        }
        self.transport.close();
        tracing::debug!(rank = self.rank, "process group shut down");
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("backend", &self.backend)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn test_single_rank_group() {
        let groups = ProcessGroup::local(1, GroupConfig::default()).unwrap();
        let pg = &groups[0];
        assert_eq!(pg.rank(), 0);
        assert_eq!(pg.size(), 1);
        assert_eq!(pg.backend_name(), "local");

        let work = pg.allreduce(Buffer::full(&[3], 2i32), ReduceOp::Sum).unwrap();
        work.wait().unwrap();
        assert_eq!(work.result().unwrap()[0].to_vec::<i32>().unwrap(), vec![2; 3]);
    }

    #[test]
    fn test_sequence_numbers_follow_issue_order() {
        let groups = ProcessGroup::local(1, GroupConfig::default()).unwrap();
        let pg = &groups[0];
        let works: Vec<Work> = (0..5).map(|_| pg.barrier().unwrap()).collect();
        let seqs: Vec<u64> = works.iter().map(Work::seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        pg.wait_all(&works).unwrap();
    }

    #[test]
    fn test_usage_error_does_not_enqueue_or_abort() {
        let groups = ProcessGroup::local(2, GroupConfig::default()).unwrap();
        let err = groups[0]
            .allgather(vec![Buffer::zeros(&[1], DataType::U8)], Buffer::zeros(&[1], DataType::U8))
            .unwrap_err();
        assert!(err.is_usage_error());
        assert!(!groups[0].is_aborted());
        // The rejected call did not consume a sequence number.
        let work = groups[0].send(Buffer::zeros(&[1], DataType::U8), 1, 0).unwrap();
        assert_eq!(work.seq(), 0);
        work.wait().unwrap();
    }

    #[test]
    fn test_issue_after_shutdown() {
        let groups = ProcessGroup::local(1, GroupConfig::default()).unwrap();
        groups[0].shutdown();
        groups[0].shutdown();
        assert!(matches!(groups[0].barrier(), Err(CollexError::ShutDown)));
    }

    #[test]
    fn test_explicit_abort_is_idempotent() {
        let groups = ProcessGroup::local(2, GroupConfig::default()).unwrap();
        groups[1].abort();
        groups[1].abort();
        assert!(groups[1].is_aborted());
        assert!(matches!(
            groups[1].broadcast(Buffer::zeros(&[1], DataType::F32), 0),
            Err(CollexError::Aborted)
        ));
    }

    #[test]
    fn test_zero_sized_local_group_rejected() {
        assert!(ProcessGroup::local(0, GroupConfig::default()).is_err());
    }
}
