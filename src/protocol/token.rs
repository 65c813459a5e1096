//! Stream tokens
//!
//! A token carries everything a remote party needs to subscribe to a stream:
//! where the owning server listens and which stream to select once connected.
//! Tokens are plain values and say nothing about whether the stream is still
//! alive.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TokenError;
use crate::protocol::constants::{PROTOCOL_VERSION, TOKEN_SIZE};

/// Identifier of a stream, unique within one dispatcher
pub type StreamId = u32;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Addressing token for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    address: SocketAddr,
    stream_id: StreamId,
    protocol_version: u8,
}

impl Token {
    /// Create a token for the current protocol version
    pub fn new(address: SocketAddr, stream_id: StreamId) -> Self {
        Self {
            address,
            stream_id,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Address of the server that owns the stream
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Stream selected by the handshake
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Protocol version the token was issued for
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Whether this build can subscribe with the token
    pub fn is_supported(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }

    /// Encode to the fixed 24-byte binary form
    ///
    /// ```text
    /// version u8 | family u8 | port u16 | stream_id u32 | address [u8; 16]
    /// ```
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TOKEN_SIZE);
        buf.put_u8(self.protocol_version);

        let mut addr = [0u8; 16];
        match self.address.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(FAMILY_V4);
                addr[..4].copy_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(FAMILY_V6);
                addr.copy_from_slice(&ip.octets());
            }
        }

        buf.put_u16(self.address.port());
        buf.put_u32(self.stream_id);
        buf.put_slice(&addr);
        buf.freeze()
    }

    /// Decode from the binary form
    ///
    /// `data` must be exactly one token; shorter or longer input is
    /// rejected. Tokens from other protocol versions are decoded as-is; use
    /// [`Token::is_supported`] to check before subscribing.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self, TokenError> {
        if data.len() != TOKEN_SIZE {
            return Err(TokenError::InvalidLength(data.len()));
        }

        let protocol_version = data.get_u8();
        let family = data.get_u8();
        let port = data.get_u16();
        let stream_id = data.get_u32();

        let mut addr = [0u8; 16];
        data.copy_to_slice(&mut addr);

        let ip = match family {
            FAMILY_V4 => IpAddr::V4(Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])),
            FAMILY_V6 => IpAddr::V6(Ipv6Addr::from(addr)),
            other => return Err(TokenError::UnknownAddressFamily(other)),
        };

        Ok(Self {
            address: SocketAddr::new(ip, port),
            stream_id,
            protocol_version,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} (v{})",
            self.address, self.stream_id, self.protocol_version
        )
    }
}
