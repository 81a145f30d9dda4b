use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Result;
use crate::registry::Registry;
use crate::stream::protocol::Reply;
use crate::stream::session;

/// How long shutdown waits for session tasks after the broadcast.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Back-off after a failed accept so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct StreamServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl StreamServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` fires, then say `BYE` to every
    /// live session and close the listener.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self { listener, registry } = self;
        let sessions = TaskTracker::new();
        tracing::info!(addr = %listener.local_addr()?, "accepting TCP connections");

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let (reader, writer) = stream.into_split();
                    let connection = registry.register(peer, writer);
                    tracing::debug!(%peer, id = connection.id(), "accepted connection");
                    sessions.spawn(session::run(connection, reader, Arc::clone(&registry)));
                }
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        let live = registry.len();
        let notified = registry.broadcast_close(Reply::Bye.to_line().as_bytes()).await;
        drop(listener);
        tracing::info!(live, notified, "shutdown: listener closed");

        sessions.close();
        if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, sessions.wait())
            .await
            .is_err()
        {
            tracing::warn!(remaining = sessions.len(), "sessions still running after shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    async fn start() -> (SocketAddr, Arc<Registry>, CancellationToken, JoinHandle<Result<()>>) {
        let server = StreamServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        (addr, registry, shutdown, handle)
    }

    async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn wait_for_sessions(registry: &Registry, expected: usize) {
        for _ in 0..200 {
            if registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} sessions, found {}", registry.len());
    }

    #[tokio::test]
    async fn test_session_stays_open_after_result() {
        let (addr, _registry, shutdown, handle) = start().await;
        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());

        client.get_mut().write_all(b"HELLO\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "HELLO\n");

        client.get_mut().write_all(b"SOLVE (+ 1 2)\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "RESULT 3\n");

        client.get_mut().write_all(b"SOLVE (* 2 (+ 1 1) 3)\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "RESULT 12\n");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_missing_hello() {
        let (addr, registry, shutdown, handle) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"SOLVE (+ 1 2)\n").await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"BYE\n");

        wait_for_sessions(&registry, 0).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let (addr, _registry, shutdown, handle) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.set_nodelay(true).unwrap();

        for byte in b"HELLO\nSOLVE (- 80 52)\nBYE\n" {
            client.write_all(&[*byte]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HELLO\nRESULT 28\nBYE\n");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_says_bye_to_every_session() {
        let (addr, registry, shutdown, handle) = start().await;

        let mut clients = Vec::new();
        for _ in 0..5 {
            let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
            client.get_mut().write_all(b"HELLO\n").await.unwrap();
            assert_eq!(read_line(&mut client).await, "HELLO\n");
            clients.push(client);
        }
        // one client that never completed the handshake
        let mut idle = TcpStream::connect(addr).await.unwrap();
        wait_for_sessions(&registry, 6).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(registry.is_empty());

        for mut client in clients {
            let mut rest = String::new();
            client.read_to_string(&mut rest).await.unwrap();
            assert_eq!(rest, "BYE\n");
        }
        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"BYE\n");

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_with_client_that_never_reads() {
        let (addr, registry, shutdown, handle) = start().await;

        let mut polite = BufReader::new(TcpStream::connect(addr).await.unwrap());
        polite.get_mut().write_all(b"HELLO\n").await.unwrap();
        assert_eq!(read_line(&mut polite).await, "HELLO\n");

        // flood requests without reading a single reply until the server
        // stops draining the socket
        let mut flooder = TcpStream::connect(addr).await.unwrap();
        flooder.write_all(b"HELLO\n").await.unwrap();
        let burst = b"SOLVE (+ 1 2)\n".repeat(4096);
        for _ in 0..10_000 {
            match tokio::time::timeout(Duration::from_millis(200), flooder.write_all(&burst)).await {
                Ok(written) => written.unwrap(),
                Err(_) => break,
            }
        }
        wait_for_sessions(&registry, 2).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("shutdown must not hang on a stalled session")
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());

        let mut rest = String::new();
        polite.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "BYE\n");
    }
}
