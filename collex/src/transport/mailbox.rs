use crate::error::{CollexError, Result};
use crate::transport::{Channel, Envelope};
use crate::types::Rank;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct MailboxState {
    /// Delivered but not yet received, in arrival order.
    queue: VecDeque<Envelope>,
    /// Set when the owning endpoint is torn down.
    closed: bool,
    /// Peers that will never deliver again.
    disconnected: HashSet<Rank>,
}

/// Inbox of one rank.
///
/// Backends push arriving messages with [`deliver`](Mailbox::deliver);
/// receivers pull the oldest message matching `(source, channel)` with
/// [`take`](Mailbox::take). Unmatched messages stay buffered, so a message
/// may arrive before its receive is posted.
pub struct Mailbox {
    rank: Rank,
    world_size: u32,
    state: Mutex<MailboxState>,
    notify: Notify,
}

impl Mailbox {
    pub fn new(rank: Rank, world_size: u32) -> Self {
        Self {
            rank,
            world_size,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                closed: false,
                disconnected: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        // No code path panics while holding the lock.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an arriving message. Returns `false` if the mailbox is closed.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        {
            let mut st = self.lock();
            if st.closed {
                return false;
            }
            st.queue.push_back(envelope);
        }
        self.notify.notify_waiters();
        true
    }

    /// Close the mailbox: every waiting and future `take` fails with `Aborted`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Record that `peer` will not deliver anything more. Messages it already
    /// delivered can still be taken.
    pub fn mark_disconnected(&self, peer: Rank) {
        self.lock().disconnected.insert(peer);
        self.notify.notify_waiters();
    }

    /// Number of buffered, unmatched messages.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Wait for the oldest message on `channel` from `src` (or from anyone when `None`).
    pub async fn take(&self, src: Option<Rank>, channel: Channel) -> Result<Envelope> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a delivery between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(found) = self.try_take(src, channel)? {
                return Ok(found);
            }
            notified.await;
        }
    }

    fn try_take(&self, src: Option<Rank>, channel: Channel) -> Result<Option<Envelope>> {
        let mut st = self.lock();
        if st.closed {
            return Err(CollexError::Aborted);
        }
        let pos = st
            .queue
            .iter()
            .position(|e| e.channel == channel && src.is_none_or(|s| s == e.src));
        if let Some(pos) = pos {
            return Ok(st.queue.remove(pos));
        }
        match src {
            Some(s) if st.disconnected.contains(&s) => {
                Err(CollexError::PeerDisconnected { rank: s })
            }
            None => {
                let live = (0..self.world_size)
                    .find(|r| *r != self.rank && !st.disconnected.contains(r));
                match (live, st.disconnected.iter().next()) {
                    (None, Some(&gone)) => Err(CollexError::PeerDisconnected { rank: gone }),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }
}
