//! Length-prefixed message framing
//!
//! Every message after the handshake is a big-endian `u32` byte count
//! followed by exactly that many payload bytes.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::constants::MESSAGE_HEADER_SIZE;

/// Length prefix for a payload of `len` bytes
///
/// Returns `None` if the payload does not fit the prefix.
pub fn encode_header(len: usize) -> Option<[u8; MESSAGE_HEADER_SIZE]> {
    u32::try_from(len).ok().map(u32::to_be_bytes)
}

/// Write one framed message
///
/// The header and payload are chained so the payload is never copied.
pub async fn write_message<W>(writer: &mut W, payload: Bytes) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = encode_header(payload.len()).ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "message too large for length prefix",
        ))
    })?;

    let mut frame = Bytes::copy_from_slice(&header).chain(payload);
    writer.write_all_buf(&mut frame).await?;
    Ok(())
}

/// Read one framed message
///
/// A length above `max_size` is treated as a broken stream, since the
/// framing can no longer be trusted.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max_size {
        tracing::warn!(len = len, max = max_size, "Oversized message, dropping connection");
        return Err(Error::ConnectionLost);
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}
