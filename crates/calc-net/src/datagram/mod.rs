//! UDP transport: one request datagram in, one response datagram out.

pub mod client;
pub mod codec;
pub mod server;

pub use client::query;
pub use codec::{FrameError, MAX_PAYLOAD, Opcode, Response, Status, respond};
pub use server::DatagramServer;
