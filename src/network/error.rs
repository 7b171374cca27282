use std::error::Error as _;
use std::fmt;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Connect failed, or the peer refused/reset the connection.
    ConnectionRefused,
    Timeout,
    /// HTTP-level failure or an `error` member in the response envelope.
    ProtocolError,
    /// The response body or its `result` could not be decoded.
    ParseError,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcErrorKind::ConnectionRefused => "connection refused",
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::ProtocolError => "protocol error",
            RpcErrorKind::ParseError => "parse error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("pRPC {kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::ProtocolError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::ParseError, message)
    }

    pub fn is_connection_error(&self) -> bool {
        self.kind == RpcErrorKind::ConnectionRefused
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            RpcErrorKind::Timeout
        } else if err.is_connect() || io_kind(&err).is_some_and(is_connection_drop) {
            RpcErrorKind::ConnectionRefused
        } else if err.is_decode() {
            RpcErrorKind::ParseError
        } else {
            RpcErrorKind::ProtocolError
        };
        RpcError::new(kind, err.to_string())
    }
}

/// First `io::ErrorKind` found in the source chain.
fn io_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = inner.source();
    }
    None
}

fn is_connection_drop(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
