//! Per-stream fan-out set
//!
//! Maps session ids to weak references on their outbound sinks. Inserts and
//! removals take the write lock and fan-out iterates under the read lock, so
//! a write either sees a session fully registered or not at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::protocol::StreamId;
use crate::session::{PushOutcome, SessionSink};

/// Map of live streams owned by a dispatcher
pub(crate) type StreamMap = RwLock<HashMap<StreamId, Weak<FanOutSet>>>;

/// Sessions subscribed to one stream
pub struct FanOutSet {
    stream_id: StreamId,
    sessions: RwLock<HashMap<u64, Weak<SessionSink>>>,
    messages_written: AtomicU64,
    dropped: AtomicU64,
    registry: Weak<StreamMap>,
}

impl FanOutSet {
    pub(crate) fn new(stream_id: StreamId, registry: Weak<StreamMap>) -> Self {
        Self {
            stream_id,
            sessions: RwLock::new(HashMap::new()),
            messages_written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            registry,
        }
    }

    /// Stream this set belongs to
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Add a session; returns `false` if it was already present
    pub(crate) fn insert(&self, sink: &Arc<SessionSink>) -> bool {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&sink.session_id()) {
            if existing.strong_count() > 0 {
                return false;
            }
        }
        sessions.insert(sink.session_id(), Arc::downgrade(sink));
        true
    }

    /// Remove a session; returns `false` if it was not present
    pub(crate) fn remove(&self, session_id: u64) -> bool {
        self.sessions.write().remove(&session_id).is_some()
    }

    /// Queue `message` on every live session
    ///
    /// Returns the number of sessions that accepted it. Never waits on a
    /// socket; a full session drops the message and bumps the counters.
    pub fn write(&self, message: Bytes) -> usize {
        self.messages_written.fetch_add(1, Ordering::Relaxed);

        let sessions = self.sessions.read();
        let mut queued = 0;

        for weak in sessions.values() {
            let Some(sink) = weak.upgrade() else {
                continue;
            };

            match sink.push(message.clone()) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::Dropped => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                PushOutcome::Closed => {}
            }
        }

        queued
    }

    /// Number of live sessions
    pub fn subscriber_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|weak| weak.upgrade().is_some_and(|sink| !sink.is_closed()))
            .count()
    }

    /// Messages written to this stream, whether or not anyone received them
    pub fn messages_written(&self) -> u64 {
        self.messages_written.load(Ordering::Relaxed)
    }

    /// Messages dropped across all sessions because of full queues
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FanOutSet {
    fn drop(&mut self) {
        // No handle can write anymore; let the sessions go.
        for weak in self.sessions.get_mut().values() {
            if let Some(sink) = weak.upgrade() {
                sink.close();
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            let mut streams = registry.write();
            let dead = streams
                .get(&self.stream_id)
                .is_some_and(|weak| weak.strong_count() == 0);
            if dead {
                streams.remove(&self.stream_id);
            }
        }

        tracing::debug!(stream_id = self.stream_id, "Stream released");
    }
}

impl std::fmt::Debug for FanOutSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutSet")
            .field("stream_id", &self.stream_id)
            .field("subscribers", &self.subscriber_count())
            .field("dropped", &self.dropped_messages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OverflowPolicy;

    fn sink(id: u64, capacity: usize) -> Arc<SessionSink> {
        Arc::new(SessionSink::new(id, capacity, OverflowPolicy::DropNewest))
    }

    #[test]
    fn test_write_reaches_every_session() {
        let set = FanOutSet::new(1, Weak::new());
        let a = sink(1, 8);
        let b = sink(2, 8);
        set.insert(&a);
        set.insert(&b);

        assert_eq!(set.write(Bytes::from_static(b"x")), 2);
        assert_eq!(a.pending(), 1);
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn test_write_without_sessions_is_noop() {
        let set = FanOutSet::new(1, Weak::new());
        assert_eq!(set.write(Bytes::from_static(b"x")), 0);
        assert_eq!(set.messages_written(), 1);
    }

    #[test]
    fn test_dead_sessions_are_skipped() {
        let set = FanOutSet::new(1, Weak::new());
        let a = sink(1, 8);
        set.insert(&a);
        drop(a);

        assert_eq!(set.write(Bytes::from_static(b"x")), 0);
        assert_eq!(set.subscriber_count(), 0);
    }

    #[test]
    fn test_insert_twice_refused() {
        let set = FanOutSet::new(1, Weak::new());
        let a = sink(1, 8);

        assert!(set.insert(&a));
        assert!(!set.insert(&a));
        assert!(set.remove(1));
        assert!(!set.remove(1));
    }

    #[test]
    fn test_full_session_does_not_affect_others() {
        let set = FanOutSet::new(1, Weak::new());
        let slow = sink(1, 1);
        let fast = sink(2, 16);
        set.insert(&slow);
        set.insert(&fast);

        for _ in 0..4 {
            set.write(Bytes::from_static(b"x"));
        }

        assert_eq!(fast.pending(), 4);
        assert_eq!(slow.pending(), 1);
        assert_eq!(set.dropped_messages(), 3);
    }

    #[test]
    fn test_drop_closes_sessions() {
        let set = FanOutSet::new(1, Weak::new());
        let a = sink(1, 8);
        set.insert(&a);

        drop(set);
        assert!(a.is_closed());
    }
}
