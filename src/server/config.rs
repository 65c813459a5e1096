//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::DEFAULT_QUEUE_CAPACITY;
use crate::session::OverflowPolicy;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Address put into tokens (defaults to the bound address)
    pub advertised_addr: Option<SocketAddr>,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// A single message write must complete within this time
    pub write_timeout: Duration,

    /// Disconnect sessions with no read or write activity (None = never)
    pub idle_timeout: Option<Duration>,

    /// Messages a session may have queued before dropping
    pub queue_capacity: usize,

    /// Which message to drop when a session queue is full
    pub overflow_policy: OverflowPolicy,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 2000)),
            advertised_addr: None,
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropNewest,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the address advertised in tokens
    pub fn advertise(mut self, addr: SocketAddr) -> Self {
        self.advertised_addr = Some(addr);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the session timeout
    ///
    /// Applies to the handshake window, to each write, and to the idle
    /// timeout if one is enabled.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self.write_timeout = timeout;
        if self.idle_timeout.is_some() {
            self.idle_timeout = Some(timeout);
        }
        self
    }

    /// Set handshake timeout only
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set write timeout only
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set session queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 2000);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert!(config.idle_timeout.is_none());
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:2001".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 2001);
    }

    #[test]
    fn test_timeout_sets_handshake_and_write() {
        let config = ServerConfig::default().timeout(Duration::from_secs(1));

        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.write_timeout, Duration::from_secs(1));
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_timeout_updates_enabled_idle_timeout() {
        let config = ServerConfig::default()
            .idle_timeout(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(2));

        assert_eq!(config.idle_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_builder_queue_capacity_floor() {
        let config = ServerConfig::default().queue_capacity(0);

        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:2000".parse().unwrap();
        let public: SocketAddr = "10.0.0.5:2000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .advertise(public)
            .max_connections(50)
            .queue_capacity(32)
            .overflow_policy(OverflowPolicy::DropOldest)
            .tcp_nodelay(false);

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.advertised_addr, Some(public));
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert!(!config.tcp_nodelay);
    }
}
