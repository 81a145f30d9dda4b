use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::registry::{Connection, ConnectionId, Registry};
use crate::stream::protocol::Session;

const READ_CHUNK: usize = 1024;

/// Removes the connection from the registry when the session task ends,
/// including when it unwinds.
struct Deregister {
    registry: Arc<Registry>,
    id: ConnectionId,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Drive one accepted connection until either side ends it.
pub(crate) async fn run(
    connection: Arc<Connection>,
    mut reader: OwnedReadHalf,
    registry: Arc<Registry>,
) {
    let guard = Deregister {
        registry,
        id: connection.id(),
    };
    let peer = connection.peer();
    let mut session = Session::new();
    let mut chunk = [0u8; READ_CHUNK];

    let farewell = loop {
        let read = tokio::select! {
            _ = connection.closed() => break None,
            read = reader.read(&mut chunk) => read,
        };
        let n = match read {
            Ok(0) => {
                tracing::debug!(%peer, "peer closed connection");
                break None;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%peer, "read failed: {e}");
                break None;
            }
        };

        let mut replies = session.feed(&chunk[..n]);
        // the closing BYE goes out together with the close below
        let last = if session.is_terminated() {
            replies.pop()
        } else {
            None
        };

        let mut failed = false;
        for reply in replies {
            tracing::debug!(%peer, %reply, "reply");
            if let Err(e) = connection.send(reply.to_line().as_bytes()).await {
                tracing::debug!(%peer, "write failed: {e}");
                failed = true;
                break;
            }
        }
        if failed {
            break None;
        }
        if let Some(reply) = last {
            tracing::debug!(%peer, %reply, "closing session");
            break Some(reply.to_line());
        }
    };

    drop(guard);
    connection
        .close(farewell.as_deref().map(str::as_bytes))
        .await;
    tracing::debug!(%peer, state = ?session.state(), "session finished");
}
