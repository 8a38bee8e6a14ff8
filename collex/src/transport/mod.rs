//! Byte-level point-to-point messaging between the ranks of a group.
//!
//! Every backend delivers [`Envelope`]s into a per-rank [`Mailbox`], which
//! matches them against receives by source rank and [`Channel`]. Collective
//! algorithms and point-to-point operations are both built on top of this.

mod local;
mod mailbox;
mod tcp;

pub use local::LocalEndpoint;
pub use mailbox::Mailbox;
pub use tcp::TcpEndpoint;

use crate::error::Result;
use crate::types::{Rank, Tag};
use futures::future::BoxFuture;

/// Logical lane a message travels on.
///
/// Collective traffic is keyed by the per-group collective sequence number,
/// so a late message from one collective can never satisfy a receive of the
/// next. Point-to-point traffic is keyed by the user tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Collective(u64),
    Tagged(Tag),
}

impl Channel {
    pub(crate) fn wire_kind(self) -> u8 {
        match self {
            Channel::Collective(_) => 0,
            Channel::Tagged(_) => 1,
        }
    }

    pub(crate) fn wire_key(self) -> u64 {
        match self {
            Channel::Collective(seq) => seq,
            Channel::Tagged(tag) => u64::from(tag),
        }
    }

    pub(crate) fn from_wire(kind: u8, key: u64) -> Option<Self> {
        match kind {
            0 => Some(Channel::Collective(key)),
            1 => u32::try_from(key).ok().map(Channel::Tagged),
            _ => None,
        }
    }
}

/// One message as seen by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub src: Rank,
    pub channel: Channel,
    pub payload: Vec<u8>,
}

/// A rank's connection to every other rank of its group.
///
/// Messages between a given pair of ranks on the same channel arrive in the
/// order they were sent.
pub trait Endpoint: Send + Sync + 'static {
    /// Name reported by `ProcessGroup::backend_name`.
    const BACKEND: &'static str;

    fn rank(&self) -> Rank;

    fn world_size(&self) -> u32;

    /// Hand `payload` to `dest`. Completes once the backend has accepted it.
    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Receive the oldest message on `channel`, from `src` or from any rank.
    fn recv<'a>(&'a self, src: Option<Rank>, channel: Channel) -> BoxFuture<'a, Result<Envelope>>;

    /// Tear down this endpoint. Pending and future operations fail.
    fn close(&self);
}
