use crate::collective::helpers::{ChunkLayout, Lane};
use crate::error::Result;
use crate::reduce::reduce_slice;
use crate::transport::Endpoint;
use crate::types::{DataType, ReduceOp};

/// Ring-allreduce: in-place reduce across all ranks.
///
/// Algorithm:
/// 1. Scatter-reduce: N-1 rounds. Each rank sends one chunk to the next rank
///    and receives one chunk from the previous rank, reducing in-place.
/// 2. Allgather: N-1 rounds. Each rank sends its fully-reduced chunk to the
///    next rank and receives from the previous rank.
///
/// After completion, `buf` on every rank holds the reduction of all ranks'
/// original data.
pub(crate) async fn ring_allreduce<E: Endpoint>(
    lane: &Lane<'_, E>,
    buf: &mut [u8],
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let world = lane.world() as usize;
    let rank = lane.rank() as usize;

    if world <= 1 {
        return Ok(());
    }

    let elem_size = dtype.size_in_bytes();
    let count = buf.len() / elem_size;
    let layout = ChunkLayout::new(count, world);

    let next = ((rank + 1) % world) as u32;
    let prev = ((rank + world - 1) % world) as u32;

    // Phase 1: Scatter-reduce (N-1 rounds).
    for step in 0..(world - 1) {
        let send_idx = (rank + world - step) % world;
        let send_off = layout.offsets[send_idx] * elem_size;
        let send_len = layout.chunk_count(send_idx) * elem_size;

        let recv_idx = (rank + world - step - 1) % world;
        let recv_off = layout.offsets[recv_idx] * elem_size;
        let recv_len = layout.chunk_count(recv_idx) * elem_size;

        let send_snapshot = buf[send_off..send_off + send_len].to_vec();
        let (_, received) = tokio::try_join!(
            lane.send(next, send_snapshot),
            lane.recv(prev, recv_len),
        )?;
        reduce_slice(
            &mut buf[recv_off..recv_off + recv_len],
            &received,
            dtype,
            op,
        )?;
    }

    // Phase 2: Allgather (N-1 rounds).
    for step in 0..(world - 1) {
        let send_idx = (rank + world + 1 - step) % world;
        let send_off = layout.offsets[send_idx] * elem_size;
        let send_len = layout.chunk_count(send_idx) * elem_size;

        let recv_idx = (rank + world - step) % world;
        let recv_off = layout.offsets[recv_idx] * elem_size;
        let recv_len = layout.chunk_count(recv_idx) * elem_size;

        let send_snapshot = buf[send_off..send_off + send_len].to_vec();
        let (_, received) = tokio::try_join!(
            lane.send(next, send_snapshot),
            lane.recv(prev, recv_len),
        )?;
        buf[recv_off..recv_off + recv_len].copy_from_slice(&received);
    }

    Ok(())
}
