use crate::collective::helpers::Lane;
use crate::error::Result;
use crate::reduce::reduce_slice;
use crate::transport::Endpoint;
use crate::types::{DataType, Rank, ReduceOp};

/// Tree reduce: reduce data from all ranks to a single root rank.
///
/// Uses a binomial tree with O(log N) steps. Handles non-power-of-2 world
/// sizes by first reducing excess ranks into the lower power-of-2 set.
/// Only the root's `data` is overwritten; other ranks keep their input.
pub(crate) async fn tree_reduce<E: Endpoint>(
    lane: &Lane<'_, E>,
    data: &mut [u8],
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
) -> Result<()> {
    let world = lane.world() as usize;
    let rank = lane.rank() as usize;
    let root = root as usize;

    if world <= 1 {
        return Ok(());
    }

    let total_bytes = data.len();
    let mut buf = data.to_vec();

    let vrank = (rank + world - root) % world;
    let real = |v: usize| ((v + root) % world) as u32;

    let p2 = if world.is_power_of_two() {
        world
    } else {
        world.next_power_of_two() >> 1
    };
    let excess = world - p2;

    let mut participating = true;
    if vrank < excess {
        let received = lane.recv(real(vrank + p2), total_bytes).await?;
        reduce_slice(&mut buf, &received, dtype, op)?;
    } else if vrank >= p2 {
        lane.send(real(vrank - p2), buf.clone()).await?;
        participating = false;
    }

    if participating {
        let log2 = p2.trailing_zeros() as usize;
        for round in 0..log2 {
            let mask = 1 << round;
            let partner = vrank ^ mask;
            if vrank & mask != 0 {
                lane.send(real(partner), buf.clone()).await?;
                break;
            } else if partner < p2 {
                let received = lane.recv(real(partner), total_bytes).await?;
                reduce_slice(&mut buf, &received, dtype, op)?;
            }
        }
    }

    if rank == root {
        data.copy_from_slice(&buf);
    }

    Ok(())
}
