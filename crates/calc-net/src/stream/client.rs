use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{NetError, Result};
use crate::stream::protocol::Reply;

/// Client side of the TCP line protocol.
pub struct StreamClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl StreamClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn hello(&mut self) -> Result<Reply> {
        self.exchange("HELLO").await
    }

    pub async fn solve(&mut self, expr: &str) -> Result<Reply> {
        if expr.contains('\n') {
            return Err(NetError::Protocol("expression contains a newline".to_string()));
        }
        self.exchange(&format!("SOLVE {expr}")).await
    }

    pub async fn bye(&mut self) -> Result<Reply> {
        self.exchange("BYE").await
    }

    async fn exchange(&mut self, line: &str) -> Result<Reply> {
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(NetError::Closed);
        }
        Reply::parse(&reply)
            .ok_or_else(|| NetError::Protocol(format!("unexpected reply {:?}", reply.trim_end())))
    }
}
