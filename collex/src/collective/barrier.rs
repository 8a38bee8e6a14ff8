use crate::collective::helpers::Lane;
use crate::error::Result;
use crate::transport::Endpoint;

/// Threshold: use two-phase barrier for small worlds, dissemination for larger.
const DISSEMINATION_THRESHOLD: u32 = 5;

/// Barrier: returns once every rank has entered it.
///
/// - `two_phase_barrier` for world_size <= 4 (lower constant overhead)
/// - `dissemination_barrier` for world_size >= 5 (O(log N) rounds, no coordinator)
pub(crate) async fn barrier<E: Endpoint>(lane: &Lane<'_, E>) -> Result<()> {
    let world = lane.world();
    if world <= 1 {
        return Ok(());
    }

    if world < DISSEMINATION_THRESHOLD {
        two_phase_barrier(lane).await
    } else {
        dissemination_barrier(lane).await
    }
}

/// All ranks check in with rank 0, which releases them once everyone arrived.
async fn two_phase_barrier<E: Endpoint>(lane: &Lane<'_, E>) -> Result<()> {
    let world = lane.world();

    if lane.rank() == 0 {
        for r in 1..world {
            lane.recv(r, 0).await?;
        }
        for r in 1..world {
            lane.send(r, Vec::new()).await?;
        }
    } else {
        lane.send(0, Vec::new()).await?;
        lane.recv(0, 0).await?;
    }
    Ok(())
}

/// Round `k`: notify `rank + 2^k`, wait for `rank - 2^k`.
async fn dissemination_barrier<E: Endpoint>(lane: &Lane<'_, E>) -> Result<()> {
    let rank = lane.rank();
    let world = lane.world();

    let mut distance = 1u32;
    while distance < world {
        let send_to = (rank + distance) % world;
        let recv_from = (rank + world - distance) % world;
        tokio::try_join!(lane.send(send_to, Vec::new()), lane.recv(recv_from, 0))?;
        distance <<= 1;
    }
    Ok(())
}
