//! Dispatcher error types

use crate::protocol::StreamId;

/// Error type for dispatcher operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No live stream with this id
    StreamNotFound(StreamId),
    /// The session is already registered on this stream
    AlreadyRegistered {
        /// Stream the session is registered on
        stream_id: StreamId,
        /// Offending session
        session_id: u64,
    },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::StreamNotFound(id) => write!(f, "Stream not found: {}", id),
            StreamError::AlreadyRegistered {
                stream_id,
                session_id,
            } => write!(
                f,
                "Session {} already registered on stream {}",
                session_id, stream_id
            ),
        }
    }
}

impl std::error::Error for StreamError {}
