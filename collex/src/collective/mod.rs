//! Collective algorithms over an [`Endpoint`](crate::transport::Endpoint).
//!
//! Each algorithm runs on one [`Lane`]: a single collective sequence number,
//! so concurrent ranks can only ever match messages of the same collective.

mod allgather;
mod allreduce;
mod barrier;
mod broadcast;
mod gather;
pub(crate) mod helpers;
mod reduce;
mod scatter;

pub(crate) use allgather::ring_allgather;
pub(crate) use allreduce::ring_allreduce;
pub(crate) use barrier::barrier;
pub(crate) use broadcast::tree_broadcast;
pub(crate) use gather::gather;
pub(crate) use helpers::Lane;
pub(crate) use reduce::tree_reduce;
pub(crate) use scatter::scatter;
