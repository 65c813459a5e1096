//! Token-addressed pub/sub streaming over TCP
//!
//! A producer creates streams on a [`StreamServer`] and writes opaque
//! messages to them. Any number of consumers subscribe with a stream's
//! [`Token`] through a [`StreamClient`] and receive every message written
//! after their subscription took effect.
//!
//! ```no_run
//! use streamcast::{ClientConfig, ServerConfig, StreamClient, StreamServer};
//!
//! # async fn example() -> streamcast::Result<()> {
//! let server = StreamServer::bind(ServerConfig::default()).await?;
//! server.start()?;
//!
//! let stream = server.make_stream();
//!
//! let client = StreamClient::new(ClientConfig::default())?;
//! client.subscribe(stream.token(), |message| {
//!     println!("{} bytes", message.len());
//! })?;
//!
//! stream.write("frame");
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is best effort: late joiners get nothing from before they
//! joined, and a subscriber that cannot keep up loses messages instead of
//! slowing down the producer.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{ClientConfig, StreamClient, SubscriptionState};
pub use dispatcher::{Dispatcher, Stream, StreamError};
pub use error::{Error, HandshakeError, Result, TokenError};
pub use protocol::{StreamId, Token};
pub use runtime::IoPool;
pub use server::{ServerConfig, StreamServer};
pub use session::{OverflowPolicy, PushOutcome, SessionContext};
pub use stats::{ServerStats, SessionStats};
