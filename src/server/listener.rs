//! Streaming server listener
//!
//! Handles the TCP accept loop and spawns a session task per connection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, Stream};
use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::server::connection::{shutdown_requested, Connection};
use crate::session::SessionContext;
use crate::stats::{ServerMetrics, ServerStats};

/// Accept policy, called once a session's handshake has been read
pub type AcceptCallback = Arc<dyn Fn(&SessionContext) -> bool + Send + Sync>;

/// State shared by the accept loop and every session task
pub(crate) struct ListenerShared {
    pub(crate) config: Arc<RwLock<ServerConfig>>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) metrics: Arc<ServerMetrics>,
    pub(crate) on_accept: AcceptCallback,
}

/// Streaming server
///
/// Owns one [`Dispatcher`]. Streams made here stay writable after the server
/// is dropped; they just stop reaching anyone.
pub struct StreamServer {
    config: Arc<RwLock<ServerConfig>>,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<ServerMetrics>,
    runtime: Handle,
    listener: Mutex<Option<TcpListener>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl StreamServer {
    /// Bind the listening socket
    ///
    /// Nothing is accepted until [`StreamServer::listen`] is called, but
    /// streams (and their tokens) can be created right away.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let endpoint = config
            .advertised_addr
            .unwrap_or_else(|| reachable_addr(local_addr));

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(addr = %local_addr, endpoint = %endpoint, "Streaming server bound");

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            local_addr,
            dispatcher: Arc::new(Dispatcher::new(endpoint)),
            metrics: Arc::new(ServerMetrics::new()),
            runtime: Handle::current(),
            listener: Mutex::new(Some(listener)),
            accept_task: Mutex::new(None),
            shutdown_tx,
            next_session_id: Arc::new(AtomicU64::new(1)),
            connection_semaphore,
        })
    }

    /// Set the session timeout (handshake, write and idle if enabled)
    ///
    /// Takes effect for every connection accepted from now on, whether or
    /// not the server is already listening. Running sessions keep the
    /// timeouts they were accepted with.
    pub fn set_timeout(&self, timeout: Duration) {
        let mut config = self.config.write();
        *config = config.clone().timeout(timeout);
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Session timeout updated");
    }

    /// Current configuration
    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Start accepting connections, letting every session through
    pub fn start(&self) -> Result<()> {
        self.listen(|_| true)
    }

    /// Start accepting connections
    ///
    /// `on_accept` sees each session after its handshake and before it is
    /// registered; returning `false` closes it.
    pub fn listen<F>(&self, on_accept: F) -> Result<()>
    where
        F: Fn(&SessionContext) -> bool + Send + Sync + 'static,
    {
        let listener = self.listener.lock().take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "server is already listening",
            ))
        })?;

        let shared = Arc::new(ListenerShared {
            config: Arc::clone(&self.config),
            dispatcher: Arc::clone(&self.dispatcher),
            metrics: Arc::clone(&self.metrics),
            on_accept: Arc::new(on_accept),
        });

        let acceptor = Acceptor {
            shared,
            shutdown: self.shutdown_tx.subscribe(),
            next_session_id: Arc::clone(&self.next_session_id),
            connection_semaphore: self.connection_semaphore.clone(),
        };

        tracing::info!(addr = %self.local_addr, "Streaming server listening");

        let task = self.runtime.spawn(acceptor.accept_loop(listener));
        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Create a new stream
    pub fn make_stream(&self) -> Stream {
        self.dispatcher.make_stream()
    }

    /// The server's dispatcher
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address put into tokens
    pub fn endpoint(&self) -> SocketAddr {
        self.dispatcher.endpoint()
    }

    /// Current server statistics
    pub fn stats(&self) -> ServerStats {
        self.metrics.snapshot(self.dispatcher.stream_count())
    }

    /// Stop accepting and close every session
    ///
    /// Streams stay writable; their writes go nowhere.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
            tracing::info!(addr = %self.local_addr, "Streaming server shut down");
        }
        self.listener.lock().take();
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Acceptor {
    shared: Arc<ListenerShared>,
    shutdown: watch::Receiver<bool>,
    next_session_id: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Acceptor {
    async fn accept_loop(mut self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                result = listener.accept() => match result {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        // Usually fd exhaustion; back off instead of spinning.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.shared.metrics.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.connection_accepted();

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.shared.config.read().tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(&self.shared),
            self.shutdown.clone(),
            permit,
        );

        tokio::spawn(connection.run());
    }
}

/// Address a remote party can connect to for a bound socket
///
/// A wildcard bind is advertised as loopback; configure an advertised
/// address for anything else.
fn reachable_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
