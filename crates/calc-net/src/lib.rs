//! Network transports for the calc-core expression engine.
//!
//! - [`stream`]: TCP line protocol (`HELLO` / `SOLVE` / `RESULT` / `BYE`)
//!   with one task per connection and a shared [`Registry`] used to say
//!   `BYE` to every live session on shutdown.
//! - [`datagram`]: single-packet binary protocol over UDP.
//!
//! Both transports call [`calc_core::evaluate`] and know nothing of each
//! other. The transport is picked once at startup through [`Server`].

pub mod config;
pub mod datagram;
pub mod error;
pub mod registry;
pub mod stream;

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;

pub use config::{DEFAULT_PORT, Mode, ServerConfig};
pub use datagram::DatagramServer;
pub use error::{NetError, Result};
pub use registry::{Connection, ConnectionId, Registry};
pub use stream::{Reply, StreamClient, StreamServer};

/// A bound server for whichever transport the config selected.
pub enum Server {
    Stream(StreamServer),
    Datagram(DatagramServer),
}

impl Server {
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = config.bind_addr();
        Ok(match config.mode {
            Mode::Tcp => Server::Stream(StreamServer::bind(addr).await?),
            Mode::Udp => Server::Datagram(DatagramServer::bind(addr).await?),
        })
    }

    pub fn mode(&self) -> Mode {
        match self {
            Server::Stream(_) => Mode::Tcp,
            Server::Datagram(_) => Mode::Udp,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Server::Stream(server) => server.local_addr(),
            Server::Datagram(server) => server.local_addr(),
        }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        match self {
            Server::Stream(server) => server.run(shutdown).await,
            Server::Datagram(server) => server.run(shutdown).await,
        }
    }
}
