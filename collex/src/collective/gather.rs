use crate::collective::helpers::Lane;
use crate::error::Result;
use crate::transport::Endpoint;
use crate::types::Rank;
use futures::future::try_join_all;

/// Gather: root collects one chunk from each rank, ordered by rank.
///
/// Uses flat gather: root posts N-1 concurrent recvs, non-root ranks send
/// their data to root. Non-root ranks get an empty result.
pub(crate) async fn gather<E: Endpoint>(
    lane: &Lane<'_, E>,
    input: &[u8],
    root: Rank,
) -> Result<Vec<Vec<u8>>> {
    let world = lane.world();
    let rank = lane.rank();
    let chunk_bytes = input.len();

    if rank != root {
        lane.send(root, input.to_vec()).await?;
        return Ok(Vec::new());
    }

    let futs: Vec<_> = (0..world)
        .filter(|&r| r != root)
        .map(|r| async move { Ok::<_, crate::error::CollexError>((r, lane.recv(r, chunk_bytes).await?)) })
        .collect();
    let received = try_join_all(futs).await?;

    let mut slots = vec![Vec::new(); world as usize];
    slots[root as usize] = input.to_vec();
    for (r, chunk) in received {
        slots[r as usize] = chunk;
    }
    Ok(slots)
}
