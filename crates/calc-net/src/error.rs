use std::fmt;

#[derive(Debug)]
pub enum NetError {
    Io(std::io::Error),
    /// The peer or the local shutdown closed the connection.
    Closed,
    Timeout,
    Protocol(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Io(e) => write!(f, "I/O error: {e}"),
            NetError::Closed => write!(f, "connection closed"),
            NetError::Timeout => write!(f, "timed out waiting for a reply"),
            NetError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e)
    }
}

impl From<tokio::time::error::Elapsed> for NetError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        NetError::Timeout
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
