//! Wire protocol
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- stream id (u32 BE) ----------->|
//!   |                                        |   [session registered]
//!   |<------ len (u32 BE) + payload --------|
//!   |<------ len (u32 BE) + payload --------|
//!   |                 ...                    |
//! ```
//!
//! The handshake is the only thing a subscriber ever sends. Payloads are
//! opaque to this layer.

pub mod constants;
pub mod framing;
pub mod handshake;
pub mod token;

pub use token::{StreamId, Token};
