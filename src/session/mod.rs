//! Server-side subscriber sessions
//!
//! A session is bound to one accepted connection and delivers one stream.
//! The connection task owns it; the dispatcher only keeps a weak reference
//! to its [`SessionSink`].

pub mod context;
pub mod outbound;
pub mod state;

pub use context::SessionContext;
pub use outbound::{OverflowPolicy, PushOutcome, SessionSink};
pub use state::{CloseReason, SessionPhase, SessionState};
