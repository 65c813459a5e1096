//! Subscriber connection
//!
//! Connects to a stream's server, sends the handshake and reads framed
//! messages.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::{framing, handshake, StreamId};

use super::config::ClientConfig;

/// One live subscriber connection
#[derive(Debug)]
pub struct StreamConnector {
    // Kept whole: dropping a write half would signal EOF to the server.
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    max_message_size: usize,
}

impl StreamConnector {
    /// Connect to `addr` and select `stream_id`
    pub async fn connect(
        addr: SocketAddr,
        stream_id: StreamId,
        config: &ClientConfig,
    ) -> Result<Self> {
        let mut socket = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;

        if config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }

        handshake::write_handshake(&mut socket, stream_id).await?;

        tracing::debug!(peer = %addr, stream_id = stream_id, "Handshake sent");

        Ok(Self {
            stream: BufReader::new(socket),
            peer_addr: addr,
            max_message_size: config.max_message_size,
        })
    }

    /// Wait for the next message
    pub async fn read_message(&mut self) -> Result<Bytes> {
        framing::read_message(&mut self.stream, self.max_message_size).await
    }

    /// Server address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_sends_handshake_and_reads_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut id = [0u8; 4];
            socket.read_exact(&mut id).await.unwrap();
            framing::write_message(&mut socket, Bytes::from_static(b"frame"))
                .await
                .unwrap();
            u32::from_be_bytes(id)
        });

        let mut connector = StreamConnector::connect(addr, 9, &ClientConfig::default())
            .await
            .unwrap();

        assert_eq!(connector.read_message().await.unwrap(), "frame");
        assert_eq!(server.await.unwrap(), 9);
        assert_eq!(connector.peer_addr(), addr);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = StreamConnector::connect(addr, 1, &ClientConfig::default()).await;
        assert!(result.is_err());
    }
}
