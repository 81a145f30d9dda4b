use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::datagram::codec::respond;
use crate::error::Result;

/// Receive buffer size; anything past a maximal request is never read.
const RECV_BUFFER: usize = 1024;

pub struct DatagramServer {
    socket: UdpSocket,
}

impl DatagramServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Answer datagrams one at a time until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut buf = [0u8; RECV_BUFFER];
        tracing::info!(addr = %self.socket.local_addr()?, "serving UDP requests");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (n, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    // no peer to answer when the receive itself fails
                    tracing::warn!("receive failed: {e}");
                    continue;
                }
            };

            let response = respond(&buf[..n]);
            tracing::debug!(%peer, status = ?response.status, message = %response.message, "response");
            if let Err(e) = self.socket.send_to(&response.encode(), peer).await {
                tracing::warn!(%peer, "send failed: {e}");
            }
        }

        tracing::info!("shutdown: UDP socket closed");
        Ok(())
    }
}
