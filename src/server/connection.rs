//! Per-connection session task
//!
//! Reads the handshake, registers the session and then writes queued
//! messages until something ends it. Every way out goes through a single
//! teardown, so the dispatcher sees exactly one deregistration.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, OwnedSemaphorePermit};

use crate::error::{Error, HandshakeError};
use crate::protocol::{framing, handshake};
use crate::session::{CloseReason, SessionContext, SessionSink, SessionState};

use super::config::ServerConfig;

use super::listener::ListenerShared;

pub(crate) struct Connection {
    /// Config as of accept; later `set_timeout` calls do not reach it
    config: ServerConfig,
    state: SessionState,
    socket: Option<TcpStream>,
    sink: Arc<SessionSink>,
    shared: Arc<ListenerShared>,
    shutdown: watch::Receiver<bool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub(crate) fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        shared: Arc<ListenerShared>,
        shutdown: watch::Receiver<bool>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let config = shared.config.read().clone();
        let sink = Arc::new(SessionSink::new(
            session_id,
            config.queue_capacity,
            config.overflow_policy,
        ));

        Self {
            config,
            state: SessionState::new(session_id, peer_addr),
            socket: Some(socket),
            sink,
            shared,
            shutdown,
            _permit: permit,
        }
    }

    /// Drive the session to completion
    pub(crate) async fn run(mut self) -> CloseReason {
        let reason = match self.socket.take() {
            Some(socket) => self.serve(socket).await,
            None => CloseReason::ConnectionLost,
        };
        self.teardown(reason);
        reason
    }

    async fn serve(&mut self, socket: TcpStream) -> CloseReason {
        let (mut reader, writer) = socket.into_split();
        let config = &self.config;

        let result = tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => return CloseReason::Shutdown,
            result = handshake::read_handshake(&mut reader, config.handshake_timeout) => result,
        };

        let stream_id = match result {
            Ok(id) => id,
            Err(e) => {
                self.shared.metrics.handshake_failed();
                tracing::debug!(
                    session_id = self.state.id,
                    peer = %self.state.peer_addr,
                    error = %e,
                    "Handshake failed"
                );
                return match e {
                    Error::Handshake(HandshakeError::Timeout) => CloseReason::HandshakeTimeout,
                    Error::Handshake(_) => CloseReason::HandshakeMalformed,
                    _ => CloseReason::ConnectionLost,
                };
            }
        };

        let ctx = SessionContext::new(
            self.state.id,
            self.state.peer_addr,
            stream_id,
            Arc::clone(&self.sink),
        );
        if !(self.shared.on_accept)(&ctx) {
            self.shared.metrics.connection_rejected();
            tracing::warn!(
                session_id = self.state.id,
                stream_id = stream_id,
                "Session rejected by accept callback"
            );
            return CloseReason::Rejected;
        }

        if let Err(e) = self.shared.dispatcher.register_session(stream_id, &self.sink) {
            self.shared.metrics.unknown_stream();
            tracing::debug!(
                session_id = self.state.id,
                stream_id = stream_id,
                error = %e,
                "Closing session for unavailable stream"
            );
            return CloseReason::StreamNotFound;
        }

        self.state.activate(stream_id);
        self.shared.metrics.session_registered();

        self.stream_loop(reader, writer).await
    }

    async fn stream_loop(
        &mut self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
    ) -> CloseReason {
        let write_timeout = self.config.write_timeout;
        let idle_timeout = self.config.idle_timeout;
        let mut read_buf = [0u8; 64];

        loop {
            let idle_deadline = idle_timeout
                .map(|timeout| tokio::time::Instant::from_std(self.state.last_activity + timeout));

            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return CloseReason::Shutdown,

                message = self.sink.pop() => {
                    let Some(message) = message else {
                        return CloseReason::StreamClosed;
                    };
                    let len = message.len();

                    match tokio::time::timeout(write_timeout, framing::write_message(&mut writer, message)).await {
                        Ok(Ok(())) => {
                            self.sink.record_sent(len);
                            self.state.touch();
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(session_id = self.state.id, error = %e, "Write failed");
                            return CloseReason::ConnectionLost;
                        }
                        Err(_) => {
                            tracing::debug!(session_id = self.state.id, "Write timed out");
                            return CloseReason::ConnectionLost;
                        }
                    }
                }

                // Subscribers send nothing after the handshake; any bytes
                // count as keepalive, EOF means they left.
                read = reader.read(&mut read_buf) => match read {
                    Ok(0) | Err(_) => return CloseReason::ConnectionLost,
                    Ok(_) => self.state.touch(),
                },

                _ = sleep_until(idle_deadline) => return CloseReason::IdleTimeout,
            }
        }
    }

    fn teardown(&mut self, reason: CloseReason) {
        let was_active = self.state.is_active();
        if !self.state.begin_close(reason) {
            return;
        }

        if let Some(stream_id) = self.state.stream_id {
            self.shared
                .dispatcher
                .deregister_session(stream_id, self.state.id);
        }
        if was_active {
            self.shared.metrics.session_deregistered();
        }
        self.sink.close();
        self.state.finish_close();

        let stats = self.sink.stats();
        tracing::debug!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            stream_id = ?self.state.stream_id,
            reason = ?reason,
            sent = stats.messages_sent,
            dropped = stats.dropped_messages,
            duration_ms = self.state.duration().as_millis() as u64,
            "Session closed"
        );
    }
}

/// Resolves once shutdown is signalled or the server is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // The returned guard must not live inside a select! output.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
