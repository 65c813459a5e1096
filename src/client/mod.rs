//! Stream client
//!
//! Turns a [`Token`](crate::Token) into a live message feed that survives
//! disconnects:
//! - Subscribing by token (or through a different address)
//! - Automatic reconnection with the same handshake
//! - Unsubscribing with a hard stop on future callbacks

pub mod config;
pub mod connector;
pub mod subscriber;

pub use config::ClientConfig;
pub use connector::StreamConnector;
pub use subscriber::{MessageCallback, StreamClient, SubscriptionState};
