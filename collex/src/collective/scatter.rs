use crate::collective::helpers::Lane;
use crate::error::{CollexError, Result};
use crate::transport::Endpoint;
use crate::types::Rank;
use futures::future::try_join_all;

/// Scatter: root distributes one chunk to each rank.
///
/// Root sends the `i`-th chunk to rank `i` and keeps its own; non-root ranks
/// receive `chunk_bytes` from root. `chunks` is only read on the root.
pub(crate) async fn scatter<E: Endpoint>(
    lane: &Lane<'_, E>,
    chunks: Vec<Vec<u8>>,
    chunk_bytes: usize,
    root: Rank,
) -> Result<Vec<u8>> {
    let rank = lane.rank();

    if rank != root {
        return lane.recv(root, chunk_bytes).await;
    }

    if chunks.len() != lane.world() as usize {
        return Err(CollexError::BufferCount {
            operation: lane.operation,
            expected: lane.world() as usize,
            actual: chunks.len(),
        });
    }

    let mut own = Vec::new();
    let mut futs = Vec::new();
    for (r, chunk) in chunks.into_iter().enumerate() {
        if r as Rank == root {
            own = chunk;
        } else {
            futs.push(lane.send(r as Rank, chunk));
        }
    }
    try_join_all(futs).await?;

    Ok(own)
}
