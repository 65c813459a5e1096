//! Per-session outbound queue
//!
//! The dispatcher pushes into a session's queue without waiting; the
//! session's connection task pops and writes. A full queue drops a message
//! instead of blocking the writer, so one slow subscriber never stalls the
//! others.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::stats::SessionStats;

/// What to discard when a session's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the incoming message
    #[default]
    DropNewest,
    /// Discard the oldest queued message to make room
    DropOldest,
}

/// Outcome of pushing a message into a session queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Message queued
    Queued,
    /// Queue was full and a message was dropped
    Dropped,
    /// Session is closed
    Closed,
}

/// Outbound side of a session, shared between the dispatcher and the
/// session's connection task
#[derive(Debug)]
pub struct SessionSink {
    session_id: u64,
    capacity: usize,
    policy: OverflowPolicy,
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    closed: AtomicBool,
    queued: AtomicU64,
    dropped: AtomicU64,
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SessionSink {
    /// Create a sink holding at most `capacity` messages (minimum 1)
    pub fn new(session_id: u64, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id,
            capacity,
            policy,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Session this sink belongs to
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a message without blocking
    pub fn push(&self, message: Bytes) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut queue = self.queue.lock();
            if queue.len() < self.capacity {
                queue.push_back(message);
                PushOutcome::Queued
            } else {
                if self.policy == OverflowPolicy::DropOldest {
                    queue.pop_front();
                    queue.push_back(message);
                }
                PushOutcome::Dropped
            }
        };

        match outcome {
            PushOutcome::Queued => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
            }
            PushOutcome::Dropped => {
                if self.policy == OverflowPolicy::DropOldest {
                    self.queued.fetch_add(1, Ordering::Relaxed);
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    session_id = self.session_id,
                    policy = ?self.policy,
                    "Session queue full, message dropped"
                );
            }
            PushOutcome::Closed => {}
        }

        outcome
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the sink is closed. Only the owning connection
    /// task pops.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            if self.is_closed() {
                return None;
            }
            let next = self.queue.lock().pop_front();
            if next.is_some() {
                return next;
            }
            // notify_one stores a permit, so a push between the check and
            // this await still wakes us.
            self.notify.notified().await;
        }
    }

    /// Record a completed write
    pub fn record_sent(&self, len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Close the sink; returns `true` for the call that actually closed it
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.queue.lock().clear();
            self.notify.notify_one();
        }
        first
    }

    /// Whether the sink has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of messages currently waiting
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot of this session's counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            messages_queued: self.queued.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            dropped_messages: self.dropped(),
            pending: self.pending(),
        }
    }
}
