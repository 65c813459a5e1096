//! Error types
//!
//! Every network-level condition here is expected in a best-effort streaming
//! system. Sessions and client connections are torn down (and clients
//! reconnect) rather than surfacing these to stream writers.

use std::fmt;
use std::io;

use crate::dispatcher::StreamError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Underlying socket error
    Io(io::Error),
    /// Handshake failed
    Handshake(HandshakeError),
    /// Stream lookup or registration failed
    Stream(StreamError),
    /// Peer closed, reset, or a write failed
    ConnectionLost,
    /// Session backlog exceeded its capacity
    QueueOverflow,
    /// Token could not be decoded or is not usable
    Token(TokenError),
    /// No tokio runtime available to drive I/O
    NoRuntime,
}

/// Handshake failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Peer did not send the stream id within the timeout
    Timeout,
    /// Peer sent something that is not a valid stream id
    Malformed(String),
    /// Accept policy refused the session
    Rejected,
}

/// Token decoding failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Input is not exactly one encoded token
    InvalidLength(usize),
    /// Address family byte is neither 4 nor 6
    UnknownAddressFamily(u8),
    /// Token was issued by an incompatible protocol version
    UnsupportedVersion(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Stream(e) => write!(f, "Stream error: {}", e),
            Error::ConnectionLost => write!(f, "Connection lost"),
            Error::QueueOverflow => write!(f, "Session queue overflow"),
            Error::Token(e) => write!(f, "Token error: {}", e),
            Error::NoRuntime => write!(f, "No tokio runtime available"),
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::Timeout => write!(f, "timed out waiting for stream id"),
            HandshakeError::Malformed(msg) => write!(f, "malformed handshake: {}", msg),
            HandshakeError::Rejected => write!(f, "session rejected"),
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::InvalidLength(len) => {
                write!(f, "invalid token length: {} bytes", len)
            }
            TokenError::UnknownAddressFamily(family) => {
                write!(f, "unknown address family: {}", family)
            }
            TokenError::UnsupportedVersion(v) => write!(f, "unsupported protocol version: {}", v),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Handshake(e) => Some(e),
            Error::Stream(e) => Some(e),
            Error::Token(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for HandshakeError {}

impl std::error::Error for TokenError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::ConnectionLost,
            _ => Error::Io(e),
        }
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        Error::Token(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_disconnects_map_to_connection_lost() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, Error::ConnectionLost));

        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, Error::ConnectionLost));

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_display() {
        let err = Error::Handshake(HandshakeError::Timeout);
        assert_eq!(err.to_string(), "Handshake error: timed out waiting for stream id");

        let err = Error::Token(TokenError::UnsupportedVersion(9));
        assert_eq!(err.to_string(), "Token error: unsupported protocol version: 9");
    }
}
