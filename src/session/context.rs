//! Accept context
//!
//! Context passed to the server's accept callback once a session's
//! handshake has been read, before it is registered. Besides inspecting the
//! session, the callback may queue messages for that one subscriber; they go
//! out ahead of anything the stream writes later.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::StreamId;
use crate::stats::SessionStats;

use super::outbound::{PushOutcome, SessionSink};

/// View of a session for accept policies
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Stream requested by the handshake
    pub stream_id: StreamId,

    sink: Arc<SessionSink>,
}

impl SessionContext {
    pub(crate) fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        stream_id: StreamId,
        sink: Arc<SessionSink>,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            stream_id,
            sink,
        }
    }

    /// Stream requested by the handshake
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Queue a message for this session only
    ///
    /// Follows the server's overflow policy like any stream write. Messages
    /// queued from the accept callback are sent once the session is
    /// registered; if it is rejected they are discarded.
    pub fn write(&self, message: impl Into<Bytes>) -> PushOutcome {
        self.sink.push(message.into())
    }

    /// Current counters for this session
    ///
    /// The context may be kept around; counters keep updating for as long
    /// as the session lives.
    pub fn stats(&self) -> SessionStats {
        self.sink.stats()
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OverflowPolicy;

    fn context(capacity: usize) -> SessionContext {
        let sink = Arc::new(SessionSink::new(4, capacity, OverflowPolicy::DropNewest));
        SessionContext::new(4, "127.0.0.1:5000".parse().unwrap(), 1, sink)
    }

    #[test]
    fn test_write_queues_on_session() {
        let ctx = context(2);

        assert_eq!(ctx.write("Hola!"), PushOutcome::Queued);
        assert_eq!(ctx.write(Bytes::from_static(b"again")), PushOutcome::Queued);
        assert_eq!(ctx.write("full"), PushOutcome::Dropped);

        let stats = ctx.stats();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.dropped_messages, 1);
    }

    #[test]
    fn test_write_after_close() {
        let ctx = context(2);
        ctx.sink.close();

        assert!(ctx.is_closed());
        assert_eq!(ctx.write("late"), PushOutcome::Closed);
    }
}
