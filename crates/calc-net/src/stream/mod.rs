//! TCP transport: line protocol, per-connection sessions and the listener.

pub mod client;
pub mod listener;
pub mod protocol;
mod session;

pub use client::StreamClient;
pub use listener::StreamServer;
pub use protocol::{MAX_LINE_LEN, Reply, Session, SessionState};
