//! Streaming server
//!
//! Accepts subscriber connections, reads their handshake and wires each one
//! into the dispatcher as a session.

pub mod config;
pub(crate) mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use listener::{AcceptCallback, StreamServer};
