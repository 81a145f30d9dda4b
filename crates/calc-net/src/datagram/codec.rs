//! Binary framing for the UDP transport.
//!
//! ```text
//! request:  [opcode=0][len L][L bytes of expression]
//! response: [opcode=1][status][len M][M bytes of message]
//! ```

use crate::error::{NetError, Result};

/// Largest payload a one-byte length prefix can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

pub const INVALID_OPCODE: &str = "Invalid opcode";
pub const INVALID_LENGTH: &str = "Invalid length";
pub const NOT_EVALUABLE: &str = "Error evaluating expression";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Request = 0,
    Response = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl Status {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            _ => None,
        }
    }
}

/// Why a request datagram was rejected before evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    InvalidOpcode,
    InvalidLength,
}

impl FrameError {
    pub fn message(self) -> &'static str {
        match self {
            FrameError::InvalidOpcode => INVALID_OPCODE,
            FrameError::InvalidLength => INVALID_LENGTH,
        }
    }
}

/// Validate a request and return the declared expression bytes.
/// Bytes beyond the declared length are ignored.
pub fn decode_request(datagram: &[u8]) -> std::result::Result<&[u8], FrameError> {
    match datagram.first() {
        Some(&op) if op == Opcode::Request as u8 => {}
        _ => return Err(FrameError::InvalidOpcode),
    }
    let len = match datagram.get(1) {
        Some(&len) if len > 0 => usize::from(len),
        _ => return Err(FrameError::InvalidLength),
    };
    datagram.get(2..2 + len).ok_or(FrameError::InvalidLength)
}

pub fn encode_request(expr: &str) -> Result<Vec<u8>> {
    let len = u8::try_from(expr.len())
        .ok()
        .filter(|&len| len > 0)
        .ok_or_else(|| {
            NetError::Protocol(format!(
                "expression must be 1..={MAX_PAYLOAD} bytes, got {}",
                expr.len()
            ))
        })?;

    let mut datagram = Vec::with_capacity(2 + expr.len());
    datagram.push(Opcode::Request as u8);
    datagram.push(len);
    datagram.extend_from_slice(expr.as_bytes());
    Ok(datagram)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub message: String,
}

impl Response {
    pub fn ok(value: u64) -> Self {
        Self {
            status: Status::Ok,
            message: value.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            message: message.to_string(),
        }
    }

    /// Messages longer than [`MAX_PAYLOAD`] are cut to fit the length byte.
    pub fn encode(&self) -> Vec<u8> {
        let message = &self.message.as_bytes()[..self.message.len().min(MAX_PAYLOAD)];
        let mut datagram = Vec::with_capacity(3 + message.len());
        datagram.push(Opcode::Response as u8);
        datagram.push(self.status as u8);
        datagram.push(message.len() as u8);
        datagram.extend_from_slice(message);
        datagram
    }

    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let [opcode, status, len, rest @ ..] = datagram else {
            return Err(NetError::Protocol(format!(
                "response too short ({} bytes)",
                datagram.len()
            )));
        };
        if *opcode != Opcode::Response as u8 {
            return Err(NetError::Protocol(format!("unexpected opcode {opcode}")));
        }
        let status = Status::from_byte(*status)
            .ok_or_else(|| NetError::Protocol(format!("unknown status {status}")))?;
        let message = rest.get(..usize::from(*len)).ok_or_else(|| {
            NetError::Protocol(format!("declared length {len} exceeds {} bytes", rest.len()))
        })?;

        Ok(Self {
            status,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }
}

/// Full server-side handling of one request datagram.
pub fn respond(datagram: &[u8]) -> Response {
    let expr = match decode_request(datagram) {
        Ok(expr) => expr,
        Err(e) => return Response::error(e.message()),
    };

    let evaluated = std::str::from_utf8(expr)
        .map_err(|e| e.to_string())
        .and_then(|expr| calc_core::evaluate(expr).map_err(|e| e.to_string()));

    match evaluated {
        Ok(value) => Response::ok(value),
        Err(reason) => {
            tracing::debug!("not evaluable: {reason}");
            Response::error(NOT_EVALUABLE)
        }
    }
}
