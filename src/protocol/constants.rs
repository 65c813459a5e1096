//! Wire protocol constants

/// Version carried in every token. Bumped on any wire-incompatible change.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the handshake message (big-endian stream id)
pub const HANDSHAKE_SIZE: usize = 4;

/// Size of the length prefix in front of every message
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Stream id 0 never identifies a stream
pub const RESERVED_STREAM_ID: u32 = 0;

/// Default upper bound for a single message accepted by clients (64 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default number of messages a session may have queued
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Size of an encoded token
pub const TOKEN_SIZE: usize = 24;
