//! Session state machine
//!
//! Tracks a subscriber session from accept to teardown.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::StreamId;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, waiting for the stream id
    HandshakePending,
    /// Registered with the dispatcher and receiving messages
    Active,
    /// Teardown in progress
    Closing,
    /// Session closed
    Closed,
}

/// Reason a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No handshake within the timeout
    HandshakeTimeout,
    /// Handshake could not be parsed
    HandshakeMalformed,
    /// Accept policy refused the session
    Rejected,
    /// Requested stream does not exist (anymore)
    StreamNotFound,
    /// Peer closed or a write failed
    ConnectionLost,
    /// No activity within the idle timeout
    IdleTimeout,
    /// Stream handle released, no more messages will come
    StreamClosed,
    /// Server is shutting down
    Shutdown,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Stream selected by the handshake
    pub stream_id: Option<StreamId>,

    /// Connection start time
    pub connected_at: Instant,

    /// Last successful read or write
    pub last_activity: Instant,

    /// Why the session ended
    pub close_reason: Option<CloseReason>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer_addr,
            phase: SessionPhase::HandshakePending,
            stream_id: None,
            connected_at: now,
            last_activity: now,
            close_reason: None,
        }
    }

    /// Record the handshake result and go active
    ///
    /// The stream id is set once; later calls are ignored.
    pub fn activate(&mut self, stream_id: StreamId) {
        if self.phase == SessionPhase::HandshakePending {
            self.stream_id = Some(stream_id);
            self.phase = SessionPhase::Active;
            self.touch();
        }
    }

    /// Mark activity on the connection
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since last activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Start closing; returns `false` if teardown already began
    pub fn begin_close(&mut self, reason: CloseReason) -> bool {
        match self.phase {
            SessionPhase::Closing | SessionPhase::Closed => false,
            _ => {
                self.phase = SessionPhase::Closing;
                self.close_reason = Some(reason);
                true
            }
        }
    }

    /// Finish teardown
    pub fn finish_close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
