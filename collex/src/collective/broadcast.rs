use crate::collective::helpers::Lane;
use crate::error::Result;
use crate::transport::Endpoint;
use crate::types::Rank;
use futures::future::try_join_all;

/// Threshold: use flat broadcast for small worlds, tree broadcast for larger.
const TREE_BROADCAST_THRESHOLD: u32 = 4;

/// Tree broadcast: root sends data to all other ranks via a binary tree.
///
/// Falls back to flat broadcast (root sends to all directly) for world sizes
/// below `TREE_BROADCAST_THRESHOLD`. On return every rank's `buf` holds the
/// root's bytes.
pub(crate) async fn tree_broadcast<E: Endpoint>(
    lane: &Lane<'_, E>,
    buf: &mut Vec<u8>,
    root: Rank,
) -> Result<()> {
    let world = lane.world();

    if world <= 1 {
        return Ok(());
    }

    if world < TREE_BROADCAST_THRESHOLD {
        return flat_broadcast(lane, buf, root).await;
    }

    let rank = lane.rank();

    // Remap ranks so root becomes logical rank 0.
    let logical = |r: Rank| -> Rank { (r + world - root) % world };
    let physical = |l: Rank| -> Rank { (l + root) % world };
    let my_logical = logical(rank);

    if my_logical != 0 {
        let parent = physical((my_logical - 1) / 2);
        *buf = lane.recv(parent, buf.len()).await?;
    }

    let children: Vec<Rank> = [2 * my_logical + 1, 2 * my_logical + 2]
        .into_iter()
        .filter(|&c| c < world)
        .map(physical)
        .collect();
    let data: &[u8] = buf;
    try_join_all(children.into_iter().map(|c| lane.send(c, data.to_vec()))).await?;

    Ok(())
}

/// Flat broadcast: root sends to all other ranks concurrently.
async fn flat_broadcast<E: Endpoint>(
    lane: &Lane<'_, E>,
    buf: &mut Vec<u8>,
    root: Rank,
) -> Result<()> {
    let world = lane.world();

    if lane.rank() == root {
        let data: &[u8] = buf;
        let futs: Vec<_> = (0..world)
            .filter(|&r| r != root)
            .map(|r| lane.send(r, data.to_vec()))
            .collect();
        try_join_all(futs).await?;
    } else {
        *buf = lane.recv(root, buf.len()).await?;
    }

    Ok(())
}
