use crate::collective::helpers::Lane;
use crate::error::Result;
use crate::transport::Endpoint;

/// Ring allgather: each rank contributes one chunk; the result holds every
/// rank's chunk, indexed by rank.
///
/// Uses N-1 ring rounds where each rank forwards the latest received chunk
/// to its successor.
pub(crate) async fn ring_allgather<E: Endpoint>(
    lane: &Lane<'_, E>,
    input: &[u8],
) -> Result<Vec<Vec<u8>>> {
    let world = lane.world() as usize;
    let rank = lane.rank() as usize;
    let chunk_bytes = input.len();

    let mut slots = vec![Vec::new(); world];
    slots[rank] = input.to_vec();

    if world <= 1 {
        return Ok(slots);
    }

    let next = ((rank + 1) % world) as u32;
    let prev = ((rank + world - 1) % world) as u32;

    for step in 0..(world - 1) {
        let send_idx = (rank + world - step) % world;
        let recv_idx = (rank + world - step - 1) % world;

        let (_, received) = tokio::try_join!(
            lane.send(next, slots[send_idx].clone()),
            lane.recv(prev, chunk_bytes),
        )?;
        slots[recv_idx] = received;
    }

    Ok(slots)
}
