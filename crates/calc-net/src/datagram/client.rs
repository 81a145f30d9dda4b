use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::datagram::codec::{Response, encode_request};
use crate::error::Result;

/// Send one expression and wait up to `timeout` for the matching response.
pub async fn query(server: SocketAddr, expr: &str, timeout: Duration) -> Result<Response> {
    let request = encode_request(expr)?;
    let local: SocketAddr = match server {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(&request).await?;

    let mut buf = [0u8; 3 + crate::datagram::MAX_PAYLOAD];
    let n = tokio::time::timeout(timeout, socket.recv(&mut buf)).await??;
    Response::decode(&buf[..n])
}
