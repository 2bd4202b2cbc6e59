//! Holon RPC client engine.
//!
//! The client dials a transport URI, then keeps one connection generation
//! alive at a time. A background supervisor task runs the generation's read
//! loop next to a heartbeat loop; when either stops, the generation is torn
//! down and the supervisor re-dials the same URI with exponential backoff.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected -> ...
//!                      |                                     (re-dial)
//!                      +-> Disconnected (initial dial failed)
//! any state -> Closed (terminal, via close())
//! ```
//!
//! `invoke` fails fast with `NotConnected` outside `Connected`; calls are
//! never queued across a disconnect window.

use super::backoff::Backoff;
use super::handlers::HandlerTable;
use super::protocol::RpcError;
use super::session::{HeartbeatState, Session};
use crate::config::ClientConfig;
use crate::transport::{self, Connection, MemRegistry};
use crate::{HolonError, Result};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::ReadHalf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`HolonRpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Reconnecting => "reconnecting",
            ClientState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Shared {
    state: ClientState,
    session: Option<Arc<Session>>,
    uri: Option<String>,
}

struct ClientInner {
    config: ClientConfig,
    handlers: HandlerTable,
    registry: MemRegistry,
    shared: Mutex<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    next_generation: AtomicU64,
}

impl ClientInner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `session` the current generation and enter `Connected`.
    /// Returns `false` if the client was closed in the meantime.
    fn install(&self, session: &Arc<Session>, uri: Option<&str>) -> bool {
        let mut shared = self.shared();
        if shared.state == ClientState::Closed {
            return false;
        }
        shared.state = ClientState::Connected;
        shared.session = Some(Arc::clone(session));
        if let Some(uri) = uri {
            shared.uri = Some(uri.to_string());
        }
        true
    }

    fn new_session(&self, conn: Connection) -> (Arc<Session>, ReadHalf<Connection>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Session::new(generation, conn)
    }
}

/// Bidirectional RPC client with heartbeat and automatic reconnection.
///
/// Handlers registered on the client answer calls the connected peer makes
/// back into it, on every connection generation.
pub struct HolonRpcClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for HolonRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared();
        f.debug_struct("HolonRpcClient")
            .field("state", &shared.state)
            .field("uri", &shared.uri)
            .finish()
    }
}

impl Default for HolonRpcClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl HolonRpcClient {
    /// Create a disconnected client. Memory URIs pair through the global
    /// registry.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_registry(config, MemRegistry::global())
    }

    /// Create a disconnected client that dials memory URIs through
    /// `registry`.
    pub fn with_registry(config: ClientConfig, registry: MemRegistry) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                config,
                handlers: HandlerTable::new(),
                registry,
                shared: Mutex::new(Shared {
                    state: ClientState::Disconnected,
                    session: None,
                    uri: None,
                }),
                shutdown,
                supervisor: Mutex::new(None),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ClientState {
        self.inner.shared().state
    }

    /// The URI last passed to a successful `connect`.
    pub fn uri(&self) -> Option<String> {
        self.inner.shared().uri.clone()
    }

    /// Heartbeat accounting of the current connection generation.
    pub fn heartbeat(&self) -> Option<HeartbeatState> {
        self.inner.shared().session.as_ref().map(|session| session.heartbeat())
    }

    /// Method table consulted for calls the peer makes into this client.
    pub fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    /// Install or replace the handler for `method`. Effective immediately,
    /// whatever the connection state.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        self.inner.handlers.register(method, handler);
    }

    /// Dial `uri` and start the read, heartbeat and reconnect loops.
    ///
    /// Only valid from `Disconnected`. A failed dial leaves the client in
    /// `Disconnected`; retrying it is up to the caller.
    pub async fn connect(&self, uri: &str) -> Result<()> {
        {
            let mut shared = self.inner.shared();
            match shared.state {
                ClientState::Disconnected => shared.state = ClientState::Connecting,
                ClientState::Closed => return Err(HolonError::Closed),
                _ => return Err(HolonError::AlreadyConnected),
            }
        }

        let conn = match transport::dial_with(uri, &self.inner.registry).await {
            Ok(conn) => conn,
            Err(e) => {
                let mut shared = self.inner.shared();
                if shared.state == ClientState::Connecting {
                    shared.state = ClientState::Disconnected;
                }
                return Err(e);
            }
        };

        let (session, reader) = self.inner.new_session(conn);
        if !self.inner.install(&session, Some(uri)) {
            session.close(|| HolonError::Closed).await;
            return Err(HolonError::Closed);
        }
        info!("holon rpc client connected to {}", uri);

        let task = tokio::spawn(supervise(
            Arc::clone(&self.inner),
            session,
            reader,
            uri.to_string(),
        ));
        let mut supervisor = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *supervisor = Some(task);
        Ok(())
    }

    /// Call `method` on the peer with the configured default timeout.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        self.invoke_timeout(method, params, self.inner.config.invoke_timeout())
            .await
    }

    /// Call `method` on the peer and wait at most `timeout` for the outcome.
    ///
    /// Fails with `NotConnected` unless the client is `Connected`, with
    /// `Remote` when the peer answers with an error, and with `Timeout`
    /// when no answer arrives in time. A timeout leaves the connection up.
    pub async fn invoke_timeout(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let session = {
            let shared = self.inner.shared();
            match (&shared.state, &shared.session) {
                (ClientState::Connected, Some(session)) => Arc::clone(session),
                _ => return Err(HolonError::NotConnected),
            }
        };
        session.invoke(method, params, timeout).await
    }

    /// Stop every loop, fail outstanding calls with `Closed` and close the
    /// connection. Calling it again does nothing.
    pub async fn close(&self) {
        let session = {
            let mut shared = self.inner.shared();
            if shared.state == ClientState::Closed {
                return;
            }
            shared.state = ClientState::Closed;
            shared.session.take()
        };

        if let Some(session) = session {
            session.close(|| HolonError::Closed).await;
        }
        self.inner.shutdown.send_replace(true);

        let task = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("client supervisor ended abnormally: {}", e);
            }
        }
        info!("holon rpc client closed");
    }
}

impl Drop for HolonRpcClient {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        let task = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Drive connection generations until the client is closed.
async fn supervise(
    inner: Arc<ClientInner>,
    session: Arc<Session>,
    reader: ReadHalf<Connection>,
    uri: String,
) {
    let mut generation = (session, reader);
    loop {
        let (session, reader) = generation;
        let reason = run_generation(&inner, Arc::clone(&session), reader).await;
        session.close(|| HolonError::Disconnected).await;

        {
            let mut shared = inner.shared();
            if shared.state == ClientState::Closed || *inner.shutdown.borrow() {
                return;
            }
            shared.state = ClientState::Reconnecting;
            shared.session = None;
        }
        warn!("connection {} to {} lost: {}; reconnecting", session.id(), uri, reason);

        generation = match reconnect(&inner, &uri).await {
            Some(next) => next,
            None => return,
        };
    }
}

/// Run one generation's read loop and heartbeat loop until either ends.
async fn run_generation(
    inner: &ClientInner,
    session: Arc<Session>,
    reader: ReadHalf<Connection>,
) -> HolonError {
    let mut shutdown = inner.shutdown.subscribe();
    tokio::select! {
        reason = Arc::clone(&session).run_read_loop(reader, inner.handlers.clone()) => reason,
        reason = heartbeat_loop(&inner.config, &session) => reason,
        _ = shutdown.wait_for(|stop| *stop) => HolonError::Closed,
    }
}

/// Ping every interval; a ping left unanswered past the timeout ends the
/// generation.
async fn heartbeat_loop(config: &ClientConfig, session: &Session) -> HolonError {
    let interval = config.heartbeat_interval();
    let timeout = config.heartbeat_timeout();
    loop {
        tokio::time::sleep(interval).await;

        let swept = session.pending().sweep_expired();
        if swept > 0 {
            debug!("connection {}: swept {} expired calls", session.id(), swept);
        }

        let deadline = Instant::now() + timeout;
        let number = match session.ping().await {
            Ok(number) => number,
            Err(e) => return e,
        };
        if !session.await_pong(number, deadline).await {
            warn!("connection {}: no pong within {:?}", session.id(), timeout);
            return HolonError::HeartbeatTimeout(timeout);
        }
    }
}

/// Re-dial `uri` with backoff until it succeeds or the client shuts down.
async fn reconnect(
    inner: &ClientInner,
    uri: &str,
) -> Option<(Arc<Session>, ReadHalf<Connection>)> {
    let mut backoff = Backoff::from_config(&inner.config);
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let delay = backoff.next_delay();
        let dialed = tokio::select! {
            dialed = async {
                tokio::time::sleep(delay).await;
                transport::dial_with(uri, &inner.registry).await
            } => dialed,
            _ = shutdown.wait_for(|stop| *stop) => return None,
        };

        match dialed {
            Ok(conn) => {
                let (session, reader) = inner.new_session(conn);
                if !inner.install(&session, None) {
                    session.close(|| HolonError::Closed).await;
                    return None;
                }
                info!(
                    "reconnected to {} after {} attempt(s)",
                    uri,
                    backoff.attempts()
                );
                return Some((session, reader));
            }
            Err(e) => {
                warn!(
                    "reconnect attempt {} to {} failed: {}",
                    backoff.attempts(),
                    uri,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::listen_with;
    use serde_json::json;

    fn fast_config() -> ClientConfig {
        ClientConfig::new()
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_heartbeat_timeout(Duration::from_millis(100))
            .with_reconnect_delays(Duration::from_millis(20), Duration::from_millis(80))
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = HolonRpcClient::new(ClientConfig::default());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.heartbeat().is_none());

        let err = client.invoke("echo.v1.Echo/Ping", json!({})).await.unwrap_err();
        assert!(matches!(err, HolonError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_connect_reverts_to_disconnected() {
        let client = HolonRpcClient::new(fast_config());

        let err = client.connect("ftp://nowhere").await.unwrap_err();
        assert!(matches!(err, HolonError::InvalidUri { .. }));
        assert_eq!(client.state(), ClientState::Disconnected);

        let err = client.connect("ws://127.0.0.1:8080").await.unwrap_err();
        assert!(matches!(err, HolonError::UnsupportedTransport { .. }));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_over_mem_and_close() {
        let registry = MemRegistry::new();
        let listener = listen_with("mem://client-test", &registry).await.unwrap();
        let client = HolonRpcClient::with_registry(fast_config(), registry);

        let (connected, accepted) = tokio::join!(client.connect("mem://client-test"), listener.accept());
        connected.unwrap();
        let _server_side = accepted.unwrap();

        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.uri().as_deref(), Some("mem://client-test"));
        assert!(matches!(
            client.connect("mem://client-test").await,
            Err(HolonError::AlreadyConnected)
        ));

        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
        assert!(matches!(client.connect("mem://client-test").await, Err(HolonError::Closed)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ClientState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ClientState::Closed.to_string(), "closed");
    }
}
