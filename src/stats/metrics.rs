//! Statistics for sessions and servers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages accepted into the outbound queue
    pub messages_queued: u64,
    /// Messages fully written to the socket
    pub messages_sent: u64,
    /// Payload bytes written to the socket
    pub bytes_sent: u64,
    /// Messages dropped because the queue was full
    pub dropped_messages: u64,
    /// Messages currently waiting to be written
    pub pending: usize,
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Sessions currently registered with the dispatcher
    pub active_sessions: u64,
    /// Connections refused by the connection limit or accept callback
    pub rejected_connections: u64,
    /// Handshakes that timed out or were malformed
    pub failed_handshakes: u64,
    /// Sessions that asked for a stream that no longer exists
    pub unknown_streams: u64,
    /// Live streams in the dispatcher
    pub active_streams: u64,
    /// Uptime
    pub uptime: Duration,
}

/// Live counters updated by the listener and connection tasks
#[derive(Debug)]
pub struct ServerMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    active_sessions: AtomicU64,
    rejected_connections: AtomicU64,
    failed_handshakes: AtomicU64,
    unknown_streams: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            failed_handshakes: AtomicU64::new(0),
            unknown_streams: AtomicU64::new(0),
        }
    }

    pub fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.failed_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_stream(&self) {
        self.unknown_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_registered(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_deregistered(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Take a snapshot; `active_streams` is filled in by the caller
    pub fn snapshot(&self, active_streams: usize) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            failed_handshakes: self.failed_handshakes.load(Ordering::Relaxed),
            unknown_streams: self.unknown_streams.load(Ordering::Relaxed),
            active_streams: active_streams as u64,
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
