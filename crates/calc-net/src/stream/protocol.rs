//! Line protocol state machine for one TCP session.
//!
//! ```text
//! C: HELLO            S: HELLO
//! C: SOLVE <expr>     S: RESULT <n>   (repeatable)
//! anything else       S: BYE          (then close)
//! ```
//!
//! [`Session`] owns the framing buffer and protocol state; it never touches
//! a socket, so the same code drives the server task and the unit tests.

use std::fmt;

/// A line that grows past this many bytes without a newline ends the session.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Ready,
    Terminated,
}

/// One server line. Also parsed by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Hello,
    Result(u64),
    Bye,
}

impl Reply {
    /// Wire form including the trailing newline.
    pub fn to_line(self) -> String {
        format!("{self}\n")
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.strip_suffix('\n').unwrap_or(line) {
            "HELLO" => Some(Reply::Hello),
            "BYE" => Some(Reply::Bye),
            other => other
                .strip_prefix("RESULT ")
                .and_then(|n| n.parse().ok())
                .map(Reply::Result),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Hello => f.write_str("HELLO"),
            Reply::Result(value) => write!(f, "RESULT {value}"),
            Reply::Bye => f.write_str("BYE"),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    buffer: Vec<u8>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingHello,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Bytes received but not yet forming a complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Append freshly read bytes and answer every complete line.
    ///
    /// Processing stops at the first `BYE`; whatever follows it in the
    /// buffer is discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Reply> {
        let mut replies = Vec::new();
        if self.is_terminated() {
            return replies;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let reply = self.handle_line(&line[..pos]);
            replies.push(reply);
            if self.is_terminated() {
                self.buffer.clear();
                return replies;
            }
        }

        if self.buffer.len() > MAX_LINE_LEN {
            tracing::debug!(len = self.buffer.len(), "line exceeds limit");
            self.terminate();
            replies.push(Reply::Bye);
        }
        replies
    }

    /// Answer one line, newline already stripped.
    pub fn handle_line(&mut self, line: &[u8]) -> Reply {
        match self.state {
            SessionState::AwaitingHello if line == b"HELLO" => {
                self.state = SessionState::Ready;
                Reply::Hello
            }
            SessionState::Ready => match solve(line) {
                Some(value) => Reply::Result(value),
                None => {
                    self.terminate();
                    Reply::Bye
                }
            },
            _ => {
                self.terminate();
                Reply::Bye
            }
        }
    }

    fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.buffer.clear();
    }
}

fn solve(line: &[u8]) -> Option<u64> {
    let expr = line.strip_prefix(b"SOLVE ")?;
    let expr = std::str::from_utf8(expr).ok()?;
    match calc_core::evaluate(expr) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(expr, "not evaluable: {e}");
            None
        }
    }
}
