//! Dispatcher implementation
//!
//! Allocates stream ids and keeps the weak map from stream id to fan-out
//! set. Stream handles own the sets; the dispatcher only finds them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::protocol::constants::RESERVED_STREAM_ID;
use crate::protocol::{StreamId, Token};
use crate::session::SessionSink;

use super::error::StreamError;
use super::fanout::{FanOutSet, StreamMap};
use super::stream::Stream;

/// Stream dispatcher for one server
///
/// Thread-safe. Lookups take a short read lock on the stream map; the lock
/// is never held while writing to sessions.
pub struct Dispatcher {
    /// Address put into every token
    endpoint: SocketAddr,

    /// Next stream id to hand out
    next_stream_id: AtomicU32,

    /// Live streams
    streams: Arc<StreamMap>,
}

impl Dispatcher {
    /// Create a dispatcher whose tokens point at `endpoint`
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            next_stream_id: AtomicU32::new(1),
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Address advertised in tokens
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Create a new stream
    pub fn make_stream(&self) -> Stream {
        let mut streams = self.streams.write();

        let stream_id = loop {
            let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
            // Skip the reserved id and, after a wrap, any id still in use.
            if id == RESERVED_STREAM_ID {
                continue;
            }
            match streams.get(&id) {
                Some(weak) if weak.strong_count() > 0 => continue,
                _ => break id,
            }
        };

        let fanout = Arc::new(FanOutSet::new(stream_id, Arc::downgrade(&self.streams)));
        streams.insert(stream_id, Arc::downgrade(&fanout));
        drop(streams);

        tracing::debug!(stream_id = stream_id, endpoint = %self.endpoint, "Stream created");

        Stream::new(Token::new(self.endpoint, stream_id), fanout)
    }

    /// Register a session after a successful handshake
    ///
    /// Fails with [`StreamError::StreamNotFound`] if the stream is gone; the
    /// caller is expected to close the session. Registering the same session
    /// twice is a bug in the caller.
    pub fn register_session(
        &self,
        stream_id: StreamId,
        sink: &Arc<SessionSink>,
    ) -> Result<(), StreamError> {
        let fanout = self
            .lookup(stream_id)
            .ok_or(StreamError::StreamNotFound(stream_id))?;

        if !fanout.insert(sink) {
            debug_assert!(
                false,
                "session {} registered twice on stream {}",
                sink.session_id(),
                stream_id
            );
            return Err(StreamError::AlreadyRegistered {
                stream_id,
                session_id: sink.session_id(),
            });
        }

        tracing::info!(
            stream_id = stream_id,
            session_id = sink.session_id(),
            subscribers = fanout.subscriber_count(),
            "Session registered"
        );

        Ok(())
    }

    /// Remove a session from a stream
    ///
    /// Safe to call for sessions that were never registered or already
    /// removed, and for streams that no longer exist.
    pub fn deregister_session(&self, stream_id: StreamId, session_id: u64) -> bool {
        let Some(fanout) = self.lookup(stream_id) else {
            return false;
        };

        let removed = fanout.remove(session_id);
        if removed {
            tracing::debug!(
                stream_id = stream_id,
                session_id = session_id,
                subscribers = fanout.subscriber_count(),
                "Session deregistered"
            );
        }
        removed
    }

    /// Write a message to every session subscribed to `stream_id`
    ///
    /// Returns the number of sessions that queued it.
    pub fn write(&self, stream_id: StreamId, message: impl Into<Bytes>) -> Result<usize, StreamError> {
        let fanout = self
            .lookup(stream_id)
            .ok_or(StreamError::StreamNotFound(stream_id))?;
        Ok(fanout.write(message.into()))
    }

    /// Whether `stream_id` is live
    pub fn has_stream(&self, stream_id: StreamId) -> bool {
        self.streams
            .read()
            .get(&stream_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Number of sessions subscribed to `stream_id`
    pub fn subscriber_count(&self, stream_id: StreamId) -> Option<usize> {
        self.lookup(stream_id).map(|fanout| fanout.subscriber_count())
    }

    /// Number of live streams
    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn lookup(&self, stream_id: StreamId) -> Option<Arc<FanOutSet>> {
        // The map guard must be gone before the upgraded Arc can drop: the
        // last drop of a FanOutSet takes the write lock.
        let weak = self.streams.read().get(&stream_id).cloned();
        weak.as_ref().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.endpoint)
            .field("streams", &self.stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OverflowPolicy;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new("127.0.0.1:2000".parse().unwrap())
    }

    fn sink(id: u64) -> Arc<SessionSink> {
        Arc::new(SessionSink::new(id, 16, OverflowPolicy::DropNewest))
    }

    #[test]
    fn test_make_stream_allocates_from_one() {
        let dispatcher = dispatcher();
        let a = dispatcher.make_stream();
        let b = dispatcher.make_stream();

        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(a.token().address(), dispatcher.endpoint());
        assert_eq!(dispatcher.stream_count(), 2);
    }

    #[test]
    fn test_ids_not_reused_after_release() {
        let dispatcher = dispatcher();
        let a = dispatcher.make_stream();
        let id = a.id();
        drop(a);

        assert!(!dispatcher.has_stream(id));
        assert_ne!(dispatcher.make_stream().id(), id);
    }

    #[test]
    fn test_register_and_write() {
        let dispatcher = dispatcher();
        let stream = dispatcher.make_stream();
        let session = sink(1);

        dispatcher.register_session(stream.id(), &session).unwrap();
        assert_eq!(dispatcher.subscriber_count(stream.id()), Some(1));

        stream.write("hello");
        assert_eq!(dispatcher.write(stream.id(), "again").unwrap(), 1);
        assert_eq!(session.pending(), 2);
    }

    #[test]
    fn test_register_unknown_stream() {
        let dispatcher = dispatcher();
        let result = dispatcher.register_session(7, &sink(1));
        assert_eq!(result, Err(StreamError::StreamNotFound(7)));
    }

    #[test]
    fn test_register_released_stream() {
        let dispatcher = dispatcher();
        let stream = dispatcher.make_stream();
        let id = stream.id();
        drop(stream);

        assert_eq!(
            dispatcher.register_session(id, &sink(1)),
            Err(StreamError::StreamNotFound(id))
        );
        assert_eq!(dispatcher.stream_count(), 0);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let dispatcher = dispatcher();
        let stream = dispatcher.make_stream();
        let session = sink(1);

        assert!(!dispatcher.deregister_session(stream.id(), 1));
        dispatcher.register_session(stream.id(), &session).unwrap();
        assert!(dispatcher.deregister_session(stream.id(), 1));
        assert!(!dispatcher.deregister_session(stream.id(), 1));
        assert!(!dispatcher.deregister_session(99, 1));

        stream.write("nobody");
        assert_eq!(session.pending(), 0);
    }

    #[test]
    fn test_write_unknown_stream() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.write(3, "x"),
            Err(StreamError::StreamNotFound(3))
        );
    }

    #[test]
    fn test_stream_outlives_dispatcher() {
        let dispatcher = dispatcher();
        let stream = dispatcher.make_stream();
        let session = sink(1);
        dispatcher.register_session(stream.id(), &session).unwrap();
        drop(dispatcher);

        stream.write("still fine");
        assert_eq!(session.pending(), 1);

        let copy = stream.clone();
        drop(stream);
        copy.write("and again");
        assert_eq!(session.pending(), 2);

        drop(copy);
        assert!(session.is_closed());
    }

    #[test]
    fn test_clones_share_fanout() {
        let dispatcher = dispatcher();
        let stream = dispatcher.make_stream();
        let copy = stream.clone();
        let session = sink(1);
        dispatcher.register_session(stream.id(), &session).unwrap();

        drop(stream);
        assert!(dispatcher.has_stream(copy.id()));
        copy.write("x");
        assert_eq!(session.pending(), 1);
        assert_eq!(copy.messages_written(), 1);
    }

    #[test]
    fn test_concurrent_writers_and_registrations() {
        let dispatcher = Arc::new(dispatcher());
        let stream = dispatcher.make_stream();
        let id = stream.id();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stream = stream.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stream.write("payload");
                    }
                })
            })
            .collect();

        let registrars: Vec<_> = (0..4u64)
            .map(|n| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for round in 0..200u64 {
                        let session = sink(n * 1000 + round);
                        dispatcher.register_session(id, &session).unwrap();
                        dispatcher.deregister_session(id, session.session_id());
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(registrars) {
            handle.join().unwrap();
        }

        assert_eq!(dispatcher.subscriber_count(id), Some(0));
        assert_eq!(stream.messages_written(), 4000);
    }
}
