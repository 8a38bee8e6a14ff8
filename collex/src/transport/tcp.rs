use crate::error::{CollexError, Result};
use crate::transport::{Channel, Endpoint, Envelope, Mailbox};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// `[kind: u8][key: u64 LE][len: u64 LE]`
const FRAME_HEADER_LEN: usize = 17;

/// Largest payload a peer may announce before the connection is dropped.
const MAX_FRAME_SIZE: u64 = 1 << 30;

/// Pause between connect attempts while the peer's listener comes up.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

/// Multi-process endpoint over a full mesh of TCP connections.
///
/// Each connection carries frames `[kind][key][len][payload]` where `kind`
/// and `key` encode the [`Channel`]. A background task per peer reads frames
/// into this rank's mailbox; when a connection ends, receives from that peer
/// fail once its already-delivered messages are drained.
///
/// Must be created inside a tokio runtime that keeps running for the
/// endpoint's lifetime.
pub struct TcpEndpoint {
    rank: Rank,
    world_size: u32,
    writers: Mutex<HashMap<Rank, SharedWriter>>,
    mailbox: Arc<Mailbox>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TcpEndpoint {
    /// Bind `addrs[rank]` and connect to every other address in `addrs`.
    pub async fn connect_mesh(
        rank: Rank,
        addrs: &[SocketAddr],
        connect_timeout: Duration,
    ) -> Result<Self> {
        let own = addrs.get(rank as usize).ok_or(CollexError::InvalidRank {
            rank,
            world_size: addrs.len() as u32,
        })?;
        let listener = TcpListener::bind(own)
            .await
            .map_err(|e| CollexError::transport_with_source(format!("tcp listen on {own}"), e))?;
        Self::establish(rank, listener, addrs, connect_timeout).await
    }

    /// Form the mesh from an already-bound listener.
    ///
    /// Lower ranks are dialed, higher ranks are accepted; the dialing side
    /// announces its rank as a `u32 LE` right after connecting.
    pub async fn establish(
        rank: Rank,
        listener: TcpListener,
        addrs: &[SocketAddr],
        connect_timeout: Duration,
    ) -> Result<Self> {
        let world_size = addrs.len() as u32;
        if rank >= world_size {
            return Err(CollexError::InvalidRank { rank, world_size });
        }

        let dial = async {
            let mut streams = Vec::new();
            for peer in 0..rank {
                let mut stream = connect_with_retry(addrs[peer as usize]).await?;
                stream
                    .write_all(&rank.to_le_bytes())
                    .await
                    .map_err(|e| CollexError::transport_with_source("tcp handshake write", e))?;
                streams.push((peer, stream));
            }
            Ok::<_, CollexError>(streams)
        };

        let accept = async {
            let mut streams: Vec<(Rank, TcpStream)> = Vec::new();
            while streams.len() < (world_size - rank - 1) as usize {
                let (mut stream, remote) = listener
                    .accept()
                    .await
                    .map_err(|e| CollexError::transport_with_source("tcp accept", e))?;
                let mut raw = [0u8; 4];
                stream
                    .read_exact(&mut raw)
                    .await
                    .map_err(|e| CollexError::transport_with_source("tcp handshake read", e))?;
                let peer = Rank::from_le_bytes(raw);
                if peer <= rank || peer >= world_size || streams.iter().any(|(r, _)| *r == peer) {
                    tracing::warn!(rank, peer, %remote, "tcp mesh: rejecting unexpected handshake");
                    continue;
                }
                streams.push((peer, stream));
            }
            Ok::<_, CollexError>(streams)
        };

        let (dialed, accepted) = tokio::time::timeout(connect_timeout, async {
            tokio::try_join!(dial, accept)
        })
        .await
        .map_err(|_| CollexError::Timeout {
            operation: "tcp mesh formation",
            timeout_ms: connect_timeout.as_millis() as u64,
        })??;

        let mailbox = Arc::new(Mailbox::new(rank, world_size));
        let mut writers = HashMap::new();
        let mut readers = Vec::new();
        for (peer, stream) in dialed.into_iter().chain(accepted) {
            stream
                .set_nodelay(true)
                .map_err(|e| CollexError::transport_with_source("tcp set_nodelay", e))?;
            let (reader, writer) = stream.into_split();
            writers.insert(peer, Arc::new(tokio::sync::Mutex::new(writer)));
            let mailbox = Arc::clone(&mailbox);
            readers.push(tokio::spawn(recv_loop(peer, reader, mailbox)));
        }
        tracing::debug!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            writers: Mutex::new(writers),
            mailbox,
            readers: Mutex::new(readers),
        })
    }
}

async fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => {
                return Err(CollexError::transport_with_source(
                    format!("tcp connect to {addr}"),
                    e,
                ));
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, channel: Channel, payload: &[u8]) -> std::io::Result<()> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0] = channel.wire_kind();
    header[1..9].copy_from_slice(&channel.wire_key().to_le_bytes());
    header[9..17].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

/// Background loop: read frames from one peer into the mailbox.
async fn recv_loop(peer: Rank, mut reader: OwnedReadHalf, mailbox: Arc<Mailbox>) {
    let mut header = [0u8; FRAME_HEADER_LEN];
    loop {
        if let Err(e) = reader.read_exact(&mut header).await {
            tracing::debug!(peer, "tcp recv loop ended: {e}");
            break;
        }
        let len = read_u64(&header[9..17]);
        if len > MAX_FRAME_SIZE {
            tracing::warn!(peer, len, "tcp: frame too large, closing connection");
            break;
        }
        let len = len as usize;
        let Some(channel) = Channel::from_wire(header[0], read_u64(&header[1..9])) else {
            tracing::warn!(peer, kind = header[0], "tcp: unknown frame kind, closing connection");
            break;
        };
        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!(peer, "tcp recv loop ended reading payload: {e}");
            break;
        }
        if !mailbox.deliver(Envelope {
            src: peer,
            channel,
            payload,
        }) {
            break;
        }
    }
    mailbox.mark_disconnected(peer);
}

impl Endpoint for TcpEndpoint {
    const BACKEND: &'static str = "tcp";

    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.mailbox.is_closed() {
                return Err(CollexError::Aborted);
            }
            if dest >= self.world_size {
                return Err(CollexError::UnknownPeer {
                    rank: dest,
                    world_size: self.world_size,
                });
            }
            if dest == self.rank {
                self.mailbox.deliver(Envelope {
                    src: self.rank,
                    channel,
                    payload,
                });
                return Ok(());
            }
            let writer = relock(&self.writers)
                .get(&dest)
                .cloned()
                .ok_or(CollexError::PeerDisconnected { rank: dest })?;
            let mut writer = writer.lock().await;
            write_frame(&mut writer, channel, &payload)
                .await
                .map_err(|e| CollexError::transport_with_source(format!("tcp send to rank {dest}"), e))
        })
    }

    fn recv<'a>(&'a self, src: Option<Rank>, channel: Channel) -> BoxFuture<'a, Result<Envelope>> {
        Box::pin(async move {
            if let Some(s) = src {
                if s >= self.world_size {
                    return Err(CollexError::UnknownPeer {
                        rank: s,
                        world_size: self.world_size,
                    });
                }
            }
            self.mailbox.take(src, channel).await
        })
    }

    fn close(&self) {
        self.mailbox.close();
        // Dropping the write halves shuts the sockets down once in-flight
        // writes release them.
        relock(&self.writers).clear();
        for handle in relock(&self.readers).drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        for handle in relock(&self.readers).drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mesh(n: u32) -> Vec<TcpEndpoint> {
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in 0..n {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addrs.push(l.local_addr().unwrap());
            listeners.push(l);
        }
        let mut tasks = Vec::new();
        for (rank, listener) in listeners.into_iter().enumerate() {
            let addrs = addrs.clone();
            tasks.push(tokio::spawn(async move {
                TcpEndpoint::establish(rank as Rank, listener, &addrs, Duration::from_secs(5)).await
            }));
        }
        let mut eps = Vec::new();
        for t in tasks {
            eps.push(t.await.unwrap().unwrap());
        }
        eps
    }

    #[tokio::test]
    async fn test_tcp_send_recv() {
        let eps = mesh(3).await;
        eps[2]
            .send(0, Channel::Tagged(11), vec![5, 6, 7])
            .await
            .unwrap();
        eps[1]
            .send(0, Channel::Collective(0), vec![1])
            .await
            .unwrap();
        let got = eps[0].recv(None, Channel::Tagged(11)).await.unwrap();
        assert_eq!(got.src, 2);
        assert_eq!(got.payload, vec![5, 6, 7]);
        let got = eps[0].recv(Some(1), Channel::Collective(0)).await.unwrap();
        assert_eq!(got.payload, vec![1]);
    }

    #[tokio::test]
    async fn test_tcp_close_disconnects_peer() {
        let eps = mesh(2).await;
        eps[1].close();
        let err = eps[0].recv(Some(1), Channel::Tagged(0)).await.unwrap_err();
        assert!(matches!(err, CollexError::PeerDisconnected { rank: 1 }));
    }

    #[tokio::test]
    async fn test_tcp_unknown_peer() {
        let eps = mesh(2).await;
        let err = eps[0].send(2, Channel::Tagged(0), vec![]).await.unwrap_err();
        assert!(matches!(err, CollexError::UnknownPeer { rank: 2, .. }));
    }

    #[tokio::test]
    async fn test_tcp_oversized_frame_drops_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (reader, _writer) = server.into_split();

        let mailbox = Arc::new(Mailbox::new(0, 2));
        let reader_task = tokio::spawn(recv_loop(1, reader, Arc::clone(&mailbox)));

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = Channel::Tagged(0).wire_kind();
        header[9..17].copy_from_slice(&(MAX_FRAME_SIZE + 1).to_le_bytes());
        client.write_all(&header).await.unwrap();

        reader_task.await.unwrap();
        let err = mailbox.take(Some(1), Channel::Tagged(0)).await.unwrap_err();
        assert!(matches!(err, CollexError::PeerDisconnected { rank: 1 }));
    }
}
