//! Stream subscriptions
//!
//! Each subscription runs as one task: connect, handshake, read messages and
//! hand them to the callback, reconnecting after any failure until the
//! subscription is stopped. One task per token keeps callbacks for that token
//! strictly sequential; different tokens run on whatever worker is free.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, TokenError};
use crate::protocol::Token;

use super::config::ClientConfig;
use super::connector::StreamConnector;

/// Callback invoked for every received message
pub type MessageCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Connecting or waiting to reconnect
    Connecting,
    /// Handshake sent, receiving messages
    Subscribed,
    /// Stop requested
    Unsubscribing,
    /// No more callbacks will start
    Stopped,
}

struct Subscription {
    token: Token,
    address: SocketAddr,
    callback: MessageCallback,
    state: Mutex<SubscriptionState>,
    /// Checked before every callback; never held while one runs, so
    /// callbacks may unsubscribe any token, their own included.
    stopped: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    messages: AtomicU64,
    reconnects: AtomicU64,
}

impl Subscription {
    fn new(token: Token, address: SocketAddr, callback: MessageCallback) -> Self {
        Self {
            token,
            address,
            callback,
            state: Mutex::new(SubscriptionState::Connecting),
            stopped: AtomicBool::new(false),
            task: Mutex::new(None),
            messages: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Move between Connecting and Subscribed; never revives a stopping one
    fn set_live_state(&self, next: SubscriptionState) {
        let mut state = self.state.lock();
        if matches!(
            *state,
            SubscriptionState::Connecting | SubscriptionState::Subscribed
        ) {
            *state = next;
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Run the callback unless stopped; returns `false` once stopped
    ///
    /// A delivery has begun once it passes the check; `stop` does not wait
    /// for it to finish.
    fn deliver(&self, message: Bytes) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.messages.fetch_add(1, Ordering::Relaxed);
        (self.callback)(message);
        true
    }

    /// Stop the subscription
    ///
    /// Never blocks: a callback already running may finish, no later one
    /// begins.
    fn stop(&self) {
        *self.state.lock() = SubscriptionState::Unsubscribing;
        self.stopped.store(true, Ordering::Release);

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        *self.state.lock() = SubscriptionState::Stopped;

        tracing::debug!(
            token = %self.token,
            messages = self.messages.load(Ordering::Relaxed),
            "Unsubscribed"
        );
    }

    async fn run(self: Arc<Self>, config: ClientConfig) {
        let stream_id = self.token.stream_id();

        while !self.is_stopped() {
            self.set_live_state(SubscriptionState::Connecting);

            match StreamConnector::connect(self.address, stream_id, &config).await {
                Ok(mut connection) => {
                    self.set_live_state(SubscriptionState::Subscribed);
                    tracing::info!(
                        peer = %self.address,
                        stream_id = stream_id,
                        "Subscribed"
                    );

                    loop {
                        match connection.read_message().await {
                            Ok(message) => {
                                if !self.deliver(message) {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(
                                    peer = %self.address,
                                    stream_id = stream_id,
                                    error = %e,
                                    "Connection lost"
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        peer = %self.address,
                        stream_id = stream_id,
                        error = %e,
                        "Connect failed"
                    );
                }
            }

            if self.is_stopped() {
                break;
            }
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(config.reconnect_delay).await;
        }
    }
}

/// Subscribes to streams by token
///
/// At most one subscription per token. Subscribing to a token that is
/// already subscribed does nothing and keeps the first callback.
///
/// # Example
/// ```no_run
/// use streamcast::{ClientConfig, StreamClient, Token};
///
/// # async fn example(token: Token) -> streamcast::Result<()> {
/// let client = StreamClient::new(ClientConfig::default())?;
/// client.subscribe(token, |message| {
///     println!("received {} bytes", message.len());
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct StreamClient {
    config: ClientConfig,
    runtime: Handle,
    subscriptions: Mutex<HashMap<Token, Arc<Subscription>>>,
}

impl StreamClient {
    /// Create a client driven by the current tokio runtime
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Ok(Self::with_handle(runtime, config))
    }

    /// Create a client driven by `runtime`
    pub fn with_handle(runtime: Handle, config: ClientConfig) -> Self {
        Self {
            config,
            runtime,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the stream behind `token`
    ///
    /// Returns `Ok(false)` if the token is already subscribed.
    pub fn subscribe<F>(&self, token: Token, callback: F) -> Result<bool>
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.subscribe_via(token.address(), token, callback)
    }

    /// Subscribe to `token`'s stream, connecting to `address` instead of the
    /// address in the token
    pub fn subscribe_via<F>(&self, address: SocketAddr, token: Token, callback: F) -> Result<bool>
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        if !token.is_supported() {
            return Err(TokenError::UnsupportedVersion(token.protocol_version()).into());
        }

        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&token) {
            tracing::debug!(token = %token, "Already subscribed");
            return Ok(false);
        }

        let subscription = Arc::new(Subscription::new(token, address, Arc::new(callback)));
        let task = self
            .runtime
            .spawn(Arc::clone(&subscription).run(self.config.clone()));
        *subscription.task.lock() = Some(task);
        subscriptions.insert(token, subscription);

        tracing::debug!(token = %token, via = %address, "Subscription added");
        Ok(true)
    }

    /// Stop the subscription for `token`
    ///
    /// Once this returns, no new callback for the token starts; one already
    /// running may still finish. Never waits, so it may be called from any
    /// callback. Returns `false` if the token was not subscribed.
    pub fn unsubscribe(&self, token: &Token) -> bool {
        let removed = self.subscriptions.lock().remove(token);
        match removed {
            Some(subscription) => {
                subscription.stop();
                true
            }
            None => false,
        }
    }

    /// State of the subscription for `token`
    pub fn subscription_state(&self, token: &Token) -> Option<SubscriptionState> {
        self.subscriptions.lock().get(token).map(|s| s.state())
    }

    /// Whether `token` currently has a live connection
    pub fn is_subscribed(&self, token: &Token) -> bool {
        self.subscription_state(token) == Some(SubscriptionState::Subscribed)
    }

    /// Messages delivered to the callback for `token`
    pub fn messages_received(&self, token: &Token) -> Option<u64> {
        self.subscriptions
            .lock()
            .get(token)
            .map(|s| s.messages.load(Ordering::Relaxed))
    }

    /// Reconnect attempts made for `token`
    pub fn reconnects(&self, token: &Token) -> Option<u64> {
        self.subscriptions
            .lock()
            .get(token)
            .map(|s| s.reconnects.load(Ordering::Relaxed))
    }

    /// Number of subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let subscriptions: Vec<_> = self
            .subscriptions
            .get_mut()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();

        for subscription in subscriptions {
            subscription.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn dead_token() -> Token {
        // Nothing listens on port 9 of the loopback in test environments.
        Token::new("127.0.0.1:9".parse().unwrap(), 1)
    }

    fn config() -> ClientConfig {
        ClientConfig::default().reconnect_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_new_outside_runtime() {
        assert!(matches!(
            StreamClient::new(ClientConfig::default()),
            Err(Error::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_twice_keeps_first() {
        let client = StreamClient::new(config()).unwrap();
        let token = dead_token();

        assert!(client.subscribe(token, |_| {}).unwrap());
        assert!(!client.subscribe(token, |_| {}).unwrap());
        assert_eq!(client.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_token() {
        let client = StreamClient::new(config()).unwrap();
        assert!(!client.unsubscribe(&dead_token()));
    }

    #[tokio::test]
    async fn test_unsubscribe_then_resubscribe() {
        let client = StreamClient::new(config()).unwrap();
        let token = dead_token();

        client.subscribe(token, |_| {}).unwrap();
        assert!(client.unsubscribe(&token));
        assert_eq!(client.subscription_state(&token), None);
        assert!(client.subscribe(token, |_| {}).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_server_keeps_reconnecting() {
        let client = StreamClient::new(config()).unwrap();
        let token = dead_token();

        client.subscribe(token, |_| {}).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            client.subscription_state(&token),
            Some(SubscriptionState::Connecting)
        );
        assert!(client.reconnects(&token).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_unsupported_token_version() {
        let client = StreamClient::new(config()).unwrap();
        let mut bytes = dead_token().to_bytes().to_vec();
        bytes[0] = 99;
        let token = Token::from_bytes(&bytes).unwrap();

        let result = client.subscribe(token, |_| {});
        assert!(matches!(
            result,
            Err(Error::Token(TokenError::UnsupportedVersion(99)))
        ));
    }

    #[test]
    fn test_stop_blocks_delivery() {
        let callback: MessageCallback = Arc::new(|_: Bytes| {});
        let subscription = Subscription::new(dead_token(), dead_token().address(), callback);

        assert!(subscription.deliver(Bytes::from_static(b"a")));
        subscription.stop();
        assert!(!subscription.deliver(Bytes::from_static(b"b")));
        assert_eq!(subscription.messages.load(Ordering::Relaxed), 1);
        assert_eq!(subscription.state(), SubscriptionState::Stopped);
    }

    #[test]
    fn test_stop_from_inside_callback() {
        let slot: Arc<Mutex<Option<Arc<Subscription>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let subscription = Arc::new(Subscription::new(
            dead_token(),
            dead_token().address(),
            Arc::new(move |_: Bytes| {
                let subscription = inner.lock().clone();
                if let Some(subscription) = subscription {
                    subscription.stop();
                }
            }),
        ));
        *slot.lock() = Some(Arc::clone(&subscription));

        assert!(subscription.deliver(Bytes::from_static(b"a")));
        assert!(!subscription.deliver(Bytes::from_static(b"b")));
        slot.lock().take();
    }

    #[test]
    fn test_stop_does_not_wait_for_running_callback() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        let callback: MessageCallback = Arc::new(move |_: Bytes| {
            entered_tx.lock().send(()).unwrap();
            release_rx.lock().recv().unwrap();
        });
        let subscription = Arc::new(Subscription::new(
            dead_token(),
            dead_token().address(),
            callback,
        ));

        let runner = {
            let subscription = Arc::clone(&subscription);
            std::thread::spawn(move || subscription.deliver(Bytes::from_static(b"a")))
        };
        entered_rx.recv().unwrap();

        // The callback is still blocked on the other thread.
        subscription.stop();
        assert_eq!(subscription.state(), SubscriptionState::Stopped);
        assert!(!subscription.deliver(Bytes::from_static(b"b")));

        release_tx.send(()).unwrap();
        assert!(runner.join().unwrap());
        assert_eq!(subscription.messages.load(Ordering::Relaxed), 1);
    }
}
