use crate::backend::Transport;
use crate::buffer::Buffer;
use crate::error::{CollexError, Result};
use crate::group::work::WorkOutput;
use crate::types::{OpKind, Rank, ReduceOp, Tag};

/// One queued operation with the buffers it captured at issue time.
pub(crate) enum Op {
    AllReduce {
        buffer: Buffer,
        op: ReduceOp,
    },
    Broadcast {
        buffer: Buffer,
        root: Rank,
    },
    Reduce {
        buffer: Buffer,
        op: ReduceOp,
        root: Rank,
    },
    AllGather {
        input: Buffer,
        outputs: Vec<Buffer>,
    },
    Gather {
        input: Buffer,
        outputs: Vec<Buffer>,
        root: Rank,
    },
    Scatter {
        output: Buffer,
        inputs: Vec<Buffer>,
        root: Rank,
    },
    Send {
        buffer: Buffer,
        dest: Rank,
        tag: Tag,
    },
    Recv {
        buffer: Buffer,
        src: Rank,
        tag: Tag,
    },
    RecvAnySource {
        buffer: Buffer,
        tag: Tag,
    },
    Barrier,
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::AllReduce { .. } => OpKind::AllReduce,
            Op::Broadcast { .. } => OpKind::Broadcast,
            Op::Reduce { .. } => OpKind::Reduce,
            Op::AllGather { .. } => OpKind::AllGather,
            Op::Gather { .. } => OpKind::Gather,
            Op::Scatter { .. } => OpKind::Scatter,
            Op::Send { .. } => OpKind::Send,
            Op::Recv { .. } => OpKind::Recv,
            Op::RecvAnySource { .. } => OpKind::RecvAnySource,
            Op::Barrier => OpKind::Barrier,
        }
    }

    /// Check what can be checked locally before the operation is queued.
    ///
    /// Peer ranks of send/recv are left to the transport: an unreachable
    /// peer is a transport failure, not misuse.
    pub fn validate(&self, rank: Rank, size: u32) -> Result<()> {
        let name = self.kind().name();
        match self {
            Op::AllReduce { .. } | Op::Send { .. } | Op::Recv { .. } => Ok(()),
            Op::RecvAnySource { .. } | Op::Barrier => Ok(()),
            Op::Broadcast { root, .. } | Op::Reduce { root, .. } => check_root(*root, size),
            Op::AllGather { input, outputs } => {
                check_count(name, outputs.len(), size as usize)?;
                check_layouts(name, input, outputs)
            }
            Op::Gather {
                input,
                outputs,
                root,
            } => {
                check_root(*root, size)?;
                if rank == *root {
                    check_count(name, outputs.len(), size as usize)?;
                    check_layouts(name, input, outputs)
                } else {
                    check_count(name, outputs.len(), 0)
                }
            }
            Op::Scatter {
                output,
                inputs,
                root,
            } => {
                check_root(*root, size)?;
                if rank == *root {
                    check_count(name, inputs.len(), size as usize)?;
                    check_layouts(name, output, inputs)
                } else {
                    check_count(name, inputs.len(), 0)
                }
            }
        }
    }

    /// Run the operation to completion against `transport`.
    pub async fn execute(self, transport: &dyn Transport) -> Result<WorkOutput> {
        let output = match self {
            Op::AllReduce { buffer, op } => single(transport.all_reduce(buffer, op).await?),
            Op::Broadcast { buffer, root } => single(transport.broadcast(buffer, root).await?),
            Op::Reduce { buffer, op, root } => {
                single(transport.reduce(buffer, op, root).await?)
            }
            Op::AllGather { input, outputs } => many(transport.all_gather(input, outputs).await?),
            Op::Gather {
                input,
                outputs,
                root,
            } => many(transport.gather(input, outputs, root).await?),
            Op::Scatter {
                output,
                inputs,
                root,
            } => single(transport.scatter(output, inputs, root).await?),
            Op::Send { buffer, dest, tag } => {
                transport.send(buffer, dest, tag).await?;
                WorkOutput::default()
            }
            Op::Recv { buffer, src, tag } => single(transport.recv(buffer, src, tag).await?),
            Op::RecvAnySource { buffer, tag } => {
                let (src, buffer) = transport.recv_any_source(buffer, tag).await?;
                WorkOutput {
                    buffers: vec![buffer],
                    source_rank: Some(src),
                }
            }
            Op::Barrier => {
                transport.barrier().await?;
                WorkOutput::default()
            }
        };
        Ok(output)
    }
}

fn single(buffer: Buffer) -> WorkOutput {
    WorkOutput {
        buffers: vec![buffer],
        source_rank: None,
    }
}

fn many(buffers: Vec<Buffer>) -> WorkOutput {
    WorkOutput {
        buffers,
        source_rank: None,
    }
}

fn check_root(root: Rank, size: u32) -> Result<()> {
    if root >= size {
        return Err(CollexError::InvalidRank {
            rank: root,
            world_size: size,
        });
    }
    Ok(())
}

fn check_count(operation: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(CollexError::BufferCount {
            operation,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_layouts(operation: &'static str, reference: &Buffer, others: &[Buffer]) -> Result<()> {
    match others.iter().find(|b| !b.same_layout(reference)) {
        Some(bad) => Err(CollexError::LayoutMismatch {
            operation,
            expected: reference.layout(),
            actual: bad.layout(),
        }),
        None => Ok(()),
    }
}
