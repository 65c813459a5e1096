//! Stream selection handshake
//!
//! Right after connecting, the subscriber sends the id of the stream it
//! wants as a big-endian `u32`. Nothing is sent back; the server either
//! starts streaming or closes the connection.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RESERVED_STREAM_ID};
use crate::protocol::token::StreamId;

/// Encode the handshake for `stream_id`
pub fn encode(stream_id: StreamId) -> [u8; HANDSHAKE_SIZE] {
    stream_id.to_be_bytes()
}

/// Decode a handshake message
pub fn decode(data: [u8; HANDSHAKE_SIZE]) -> std::result::Result<StreamId, HandshakeError> {
    let stream_id = StreamId::from_be_bytes(data);
    if stream_id == RESERVED_STREAM_ID {
        return Err(HandshakeError::Malformed("reserved stream id 0".into()));
    }
    Ok(stream_id)
}

/// Send the handshake selecting `stream_id`
pub async fn write_handshake<W>(writer: &mut W, stream_id: StreamId) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(stream_id)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the subscriber's handshake, giving up after `timeout`
pub async fn read_handshake<R>(reader: &mut R, timeout: Duration) -> Result<StreamId>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HANDSHAKE_SIZE];

    match tokio::time::timeout(timeout, reader.read_exact(&mut buf)).await {
        Err(_) => Err(HandshakeError::Timeout.into()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
            HandshakeError::Malformed("connection closed during handshake".into()).into(),
        ),
        Ok(Err(e)) => Err(Error::from(e)),
        Ok(Ok(_)) => Ok(decode(buf)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_big_endian() {
        assert_eq!(encode(1), [0, 0, 0, 1]);
        assert_eq!(encode(0x0102_0304), [1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_rejects_reserved_id() {
        assert!(matches!(
            decode([0, 0, 0, 0]),
            Err(HandshakeError::Malformed(_))
        ));
        assert_eq!(decode([0, 0, 1, 0]), Ok(256));
    }

    #[tokio::test]
    async fn test_read_handshake() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_handshake(&mut client, 12).await.unwrap();
        let id = read_handshake(&mut server, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(id, 12);
    }

    #[tokio::test]
    async fn test_read_handshake_short_read_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&[0, 1]).await.unwrap();
        drop(client);

        let result = read_handshake(&mut server, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(Error::Handshake(HandshakeError::Malformed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_handshake_timeout() {
        let (_client, mut server) = tokio::io::duplex(64);

        let result = read_handshake(&mut server, Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(Error::Handshake(HandshakeError::Timeout))
        ));
    }
}
