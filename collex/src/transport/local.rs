use crate::error::{CollexError, Result};
use crate::transport::{Channel, Endpoint, Envelope, Mailbox};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Mailboxes of every rank in one in-process group.
struct LocalFabric {
    mailboxes: Vec<Mailbox>,
}

/// In-process endpoint: every rank lives in the same OS process and a send
/// moves the payload straight into the destination's mailbox.
///
/// Sends complete as soon as the message is queued at the receiver.
pub struct LocalEndpoint {
    rank: Rank,
    fabric: Arc<LocalFabric>,
}

impl LocalEndpoint {
    /// Build a fully connected group of `world_size` endpoints, indexed by rank.
    pub fn mesh(world_size: u32) -> Vec<LocalEndpoint> {
        let fabric = Arc::new(LocalFabric {
            mailboxes: (0..world_size).map(|r| Mailbox::new(r, world_size)).collect(),
        });
        (0..world_size)
            .map(|rank| LocalEndpoint {
                rank,
                fabric: Arc::clone(&fabric),
            })
            .collect()
    }

    fn mailbox(&self, rank: Rank) -> Option<&Mailbox> {
        self.fabric.mailboxes.get(rank as usize)
    }

    fn own_mailbox(&self) -> &Mailbox {
        &self.fabric.mailboxes[self.rank as usize]
    }
}

impl Endpoint for LocalEndpoint {
    const BACKEND: &'static str = "local";

    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.fabric.mailboxes.len() as u32
    }

    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.own_mailbox().is_closed() {
                return Err(CollexError::Aborted);
            }
            let mailbox = self.mailbox(dest).ok_or(CollexError::UnknownPeer {
                rank: dest,
                world_size: self.world_size(),
            })?;
            let delivered = mailbox.deliver(Envelope {
                src: self.rank,
                channel,
                payload,
            });
            if delivered {
                Ok(())
            } else {
                Err(CollexError::PeerDisconnected { rank: dest })
            }
        })
    }

    fn recv<'a>(&'a self, src: Option<Rank>, channel: Channel) -> BoxFuture<'a, Result<Envelope>> {
        Box::pin(async move {
            if let Some(s) = src {
                if s >= self.world_size() {
                    return Err(CollexError::UnknownPeer {
                        rank: s,
                        world_size: self.world_size(),
                    });
                }
            }
            self.own_mailbox().take(src, channel).await
        })
    }

    fn close(&self) {
        self.own_mailbox().close();
        for (r, mailbox) in self.fabric.mailboxes.iter().enumerate() {
            if r != self.rank as usize {
                mailbox.mark_disconnected(self.rank);
            }
        }
    }
}
