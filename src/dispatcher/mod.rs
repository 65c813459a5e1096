//! Stream dispatcher for pub/sub routing
//!
//! The dispatcher hands out streams and routes each message written to a
//! stream to every session subscribed to it.
//!
//! # Architecture
//!
//! ```text
//!        Dispatcher                          Stream (Clone)
//!   ┌──────────────────────┐            ┌──────────────────┐
//!   │ streams: HashMap<Id, │   weak     │ token            │
//!   │   Weak<FanOutSet>>   │ ─ ─ ─ ─ ─► │ Arc<FanOutSet>   │
//!   └──────────┬───────────┘            └────────┬─────────┘
//!              │ register / deregister           │ write()
//!              ▼                                 ▼
//!        FanOutSet { session_id -> Weak<SessionSink> }
//!              │
//!      ┌───────┴────────┬─────────────────┐
//!      ▼                ▼                 ▼
//!  [SessionSink]   [SessionSink]     [SessionSink]
//!   queue → TCP     queue → TCP       queue → TCP
//! ```
//!
//! Messages are `bytes::Bytes`, so every session shares the same allocation.
//! Stream handles own the fan-out set, which is why a stream keeps working
//! (as a no-op) after its server is gone.

pub mod error;
pub mod fanout;
pub mod store;
pub mod stream;

pub use error::StreamError;
pub use fanout::FanOutSet;
pub use store::Dispatcher;
pub use stream::Stream;
