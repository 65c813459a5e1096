//! Stream handles
//!
//! A [`Stream`] is the producer's side of a stream. Clones share the same
//! fan-out set; the set lives for as long as any clone does, even after the
//! server that created it is gone. Writing never blocks and never fails.

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{StreamId, Token};

use super::fanout::FanOutSet;

/// Producer handle for one stream
#[derive(Clone)]
pub struct Stream {
    token: Token,
    fanout: Arc<FanOutSet>,
}

impl Stream {
    pub(crate) fn new(token: Token, fanout: Arc<FanOutSet>) -> Self {
        Self { token, fanout }
    }

    /// Stream id
    pub fn id(&self) -> StreamId {
        self.token.stream_id()
    }

    /// Token a remote client subscribes with
    pub fn token(&self) -> Token {
        self.token
    }

    /// Send a message to every current subscriber
    ///
    /// With no subscribers, or once the server has shut down, this does
    /// nothing.
    pub fn write(&self, message: impl Into<Bytes>) {
        self.fanout.write(message.into());
    }

    /// Number of sessions currently subscribed
    pub fn subscriber_count(&self) -> usize {
        self.fanout.subscriber_count()
    }

    /// Messages dropped for slow subscribers so far
    pub fn dropped_messages(&self) -> u64 {
        self.fanout.dropped_messages()
    }

    /// Messages written through any handle of this stream
    pub fn messages_written(&self) -> u64 {
        self.fanout.messages_written()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("token", &self.token)
            .field("fanout", &self.fanout)
            .finish()
    }
}
