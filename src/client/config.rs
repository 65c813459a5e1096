//! Client configuration

use std::time::Duration;

use crate::protocol::constants::DEFAULT_MAX_MESSAGE_SIZE;

/// Subscriber-side configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Give up on a connection attempt after this long
    pub connect_timeout: Duration,

    /// Wait this long before reconnecting after a failure
    pub reconnect_delay: Duration,

    /// Largest message accepted; bigger frames drop the connection
    pub max_message_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}
