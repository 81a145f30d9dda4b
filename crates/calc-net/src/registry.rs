//! Shared set of live TCP connections.
//!
//! The registry lock guards only the map itself and is never held across an
//! `.await`. Each [`Connection`] serializes its own writes behind a separate
//! async lock, so the shutdown broadcast and a session's own close can race
//! without deadlocking: whoever takes the write half first closes the socket,
//! and the loser sees `None` and does nothing. Closing cancels the
//! connection's token before waiting on the writer, which unblocks a send
//! stuck behind a peer that stopped reading.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{NetError, Result};

pub type ConnectionId = u64;

/// Upper bound on one farewell write during shutdown.
const FAREWELL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    closed: CancellationToken,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed from either side.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Write `message` in full, or give up with [`NetError::Closed`] as soon
    /// as the connection is closed. A peer that stops reading therefore cannot
    /// pin the writer lock past a close.
    pub async fn send(&self, message: &[u8]) -> Result<()> {
        let mut writer = tokio::select! {
            _ = self.closed.cancelled() => return Err(NetError::Closed),
            writer = self.writer.lock() => writer,
        };
        let Some(w) = writer.as_mut() else {
            return Err(NetError::Closed);
        };
        tokio::select! {
            _ = self.closed.cancelled() => Err(NetError::Closed),
            written = w.write_all(message) => {
                written?;
                Ok(())
            }
        }
    }

    /// Close the write side, optionally sending `farewell` first.
    ///
    /// Returns `true` only for the call that actually closed the socket;
    /// later calls are no-ops. Every step is bounded by [`FAREWELL_TIMEOUT`].
    pub async fn close(&self, farewell: Option<&[u8]>) -> bool {
        // cancel first: an in-flight send sees it and releases the writer
        self.closed.cancel();

        let taken = match tokio::time::timeout(FAREWELL_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                tracing::debug!(peer = %self.peer, "writer still busy, skipping farewell");
                return false;
            }
        };
        let Some(mut w) = taken else {
            return false;
        };

        if let Some(message) = farewell {
            match tokio::time::timeout(FAREWELL_TIMEOUT, w.write_all(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(peer = %self.peer, "farewell write failed: {e}"),
                Err(_) => tracing::debug!(peer = %self.peer, "farewell write timed out"),
            }
        }
        let _ = tokio::time::timeout(FAREWELL_TIMEOUT, w.shutdown()).await;
        true
    }
}

#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a freshly accepted connection and hand back its shared handle.
    pub fn register(&self, peer: SocketAddr, writer: OwnedWriteHalf) -> Arc<Connection> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let connection = Arc::new(Connection {
            id,
            peer,
            writer: AsyncMutex::new(Some(writer)),
            closed: CancellationToken::new(),
        });
        inner.connections.insert(id, Arc::clone(&connection));
        connection
    }

    /// Removing an id that is already gone is a no-op.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        self.lock().connections.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the registry, returning every connection that was in it.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.lock().connections.drain().map(|(_, c)| c).collect()
    }

    /// Send `farewell` to every registered connection and close it.
    /// Returns how many connections this call actually closed.
    pub async fn broadcast_close(&self, farewell: &[u8]) -> usize {
        // snapshot first: the registry lock must not be held across the writes
        let connections = self.drain();
        let mut closed = 0;
        for connection in connections {
            if connection.close(Some(farewell)).await {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// Accepted server-side write half plus the client end of the socket.
    async fn socket_pair() -> (SocketAddr, OwnedWriteHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();
        (peer, write, client)
    }

    async fn read_to_end(mut client: TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        received
    }

    #[tokio::test]
    async fn test_register_assigns_distinct_ids() {
        let registry = Registry::new();
        let (peer_a, write_a, _client_a) = socket_pair().await;
        let (peer_b, write_b, _client_b) = socket_pair().await;

        let a = registry.register(peer_a, write_a);
        let b = registry.register(peer_b, write_b);

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = Registry::new();
        let (peer, write, _client) = socket_pair().await;
        let connection = registry.register(peer, write);

        assert!(registry.deregister(connection.id()));
        assert!(!registry.deregister(connection.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = Registry::new();
        let (peer, write, client) = socket_pair().await;
        let connection = registry.register(peer, write);

        assert!(connection.close(Some(b"BYE\n")).await);
        assert!(!connection.close(Some(b"BYE\n")).await);
        assert!(connection.is_closed());
        assert!(matches!(connection.send(b"x").await, Err(NetError::Closed)));

        assert_eq!(read_to_end(client).await, b"BYE\n");
    }

    #[tokio::test]
    async fn test_close_interrupts_stalled_send() {
        let registry = Registry::new();
        let (peer, write, _client) = socket_pair().await;
        let connection = registry.register(peer, write);

        // the client never reads, so this write stalls once the buffers fill
        let sender = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.send(&vec![b'x'; 64 << 20]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let closed = tokio::time::timeout(
            Duration::from_secs(5),
            connection.close(Some(b"BYE\n")),
        )
        .await
        .expect("close must not wait behind a stalled send");
        assert!(closed);
        assert!(matches!(sender.await.unwrap(), Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_each_connection_once() {
        let registry = Registry::new();
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (peer, write, client) = socket_pair().await;
            registry.register(peer, write);
            clients.push(client);
        }

        assert_eq!(registry.broadcast_close(b"BYE\n").await, 3);
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast_close(b"BYE\n").await, 0);

        for client in clients {
            assert_eq!(read_to_end(client).await, b"BYE\n");
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_already_closed() {
        let registry = Registry::new();
        let (peer, write, client) = socket_pair().await;
        let connection = registry.register(peer, write);

        // session closed itself but has not deregistered yet
        connection.close(None).await;
        assert_eq!(registry.broadcast_close(b"BYE\n").await, 0);
        assert!(read_to_end(client).await.is_empty());
    }
}
