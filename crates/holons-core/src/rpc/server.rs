//! Holon RPC server.
//!
//! Listens on any listenable transport URI, accepts connections and runs
//! each one as a peer session. Peers get the same read loop as the client,
//! so the server can call back into a connected peer while serving it.
//!
//! # Thread Safety
//!
//! The accept loop and every peer session run in their own spawned tasks.
//! Live peers are tracked in a shared map keyed by peer id.

use super::handlers::HandlerTable;
use super::protocol::RpcError;
use super::session::{PeerHandle, Session};
use crate::transport::{self, Listener, MemRegistry};
use crate::{HolonError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info};

type PeerMap = Arc<Mutex<HashMap<u64, Arc<Session>>>>;

fn lock_peers(peers: &PeerMap) -> MutexGuard<'_, HashMap<u64, Arc<Session>>> {
    peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running server. Dropping it shuts the server down.
pub struct HolonRpcServerHandle {
    address: String,
    handlers: HandlerTable,
    peers: PeerMap,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for HolonRpcServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolonRpcServerHandle")
            .field("address", &self.address)
            .field("peers", &self.peer_ids())
            .finish()
    }
}

impl HolonRpcServerHandle {
    /// Canonical address clients can dial (TCP carries the bound port).
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Install or replace the handler for `method` on every peer.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        self.handlers.register(method, handler);
    }

    /// Ids of the currently connected peers, ascending.
    pub fn peer_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = lock_peers(&self.peers).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn peer(&self, peer_id: u64) -> Option<PeerHandle> {
        lock_peers(&self.peers)
            .get(&peer_id)
            .map(|session| PeerHandle::new(Arc::clone(session)))
    }

    /// Call `method` on a connected peer.
    pub async fn invoke(
        &self,
        peer_id: u64,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let peer = self.peer(peer_id).ok_or(HolonError::UnknownPeer(peer_id))?;
        peer.invoke(method, params, timeout).await
    }

    /// Drop every live connection. The server keeps accepting.
    pub async fn disconnect_peers(&self) -> usize {
        let sessions: Vec<Arc<Session>> = lock_peers(&self.peers).drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for session in sessions {
            session.close(|| HolonError::Disconnected).await;
        }
        if count > 0 {
            info!("disconnected {} peer(s) from {}", count, self.address);
        }
        count
    }

    /// Stop accepting and close every peer connection.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for HolonRpcServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Server that exposes a handler table on a transport URI.
pub struct HolonRpcServer;

impl HolonRpcServer {
    /// Listen on `uri` and serve `handlers` to every peer that connects.
    /// Memory URIs pair through the global registry.
    pub async fn start(uri: &str, handlers: HandlerTable) -> Result<HolonRpcServerHandle> {
        Self::start_with(uri, &MemRegistry::global(), handlers).await
    }

    /// Like [`HolonRpcServer::start`], pairing memory URIs through `registry`.
    pub async fn start_with(
        uri: &str,
        registry: &MemRegistry,
        handlers: HandlerTable,
    ) -> Result<HolonRpcServerHandle> {
        let listener = transport::listen_with(uri, registry).await?;
        let address = listener.address();
        info!("holon rpc server listening on {}", address);

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            handlers.clone(),
            Arc::clone(&peers),
            shutdown_rx,
            conn_shutdown_rx,
        ));

        Ok(HolonRpcServerHandle {
            address,
            handlers,
            peers,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: Listener,
        handlers: HandlerTable,
        peers: PeerMap,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
    ) {
        let next_peer = AtomicU64::new(1);
        let mut accepting = true;
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("holon rpc server on {} shutting down", listener.address());
                    break;
                }
                accept_result = listener.accept(), if accepting => {
                    match accept_result {
                        Ok(conn) => {
                            let peer_id = next_peer.fetch_add(1, Ordering::Relaxed);
                            let (session, reader) = Session::new(peer_id, conn);
                            lock_peers(&peers).insert(peer_id, Arc::clone(&session));
                            debug!("peer {} connected", peer_id);

                            let handlers = handlers.clone();
                            let peers = Arc::clone(&peers);
                            let mut conn_shutdown = conn_shutdown_rx.clone();
                            tokio::spawn(async move {
                                let reason = tokio::select! {
                                    reason = Arc::clone(&session).run_read_loop(reader, handlers) => reason,
                                    _ = conn_shutdown.wait_for(|stop| *stop) => HolonError::Closed,
                                };
                                session.close(|| HolonError::Disconnected).await;
                                lock_peers(&peers).remove(&peer_id);
                                debug!("peer {} ended: {}", peer_id, reason);
                            });
                        }
                        Err(e @ HolonError::AlreadyAccepted { .. })
                        | Err(e @ HolonError::UnsupportedTransport { .. }) => {
                            // Peers already accepted keep being served.
                            debug!("listener {} stops accepting: {}", listener.address(), e);
                            accepting = false;
                        }
                        Err(e) => {
                            error!("accept error on {}: {}", listener.address(), e);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }
        listener.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::HolonRpcClient;
    use crate::config::ClientConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_server_resolves_tcp_port() {
        let server = HolonRpcServer::start("tcp://127.0.0.1:0", HandlerTable::new())
            .await
            .unwrap();
        assert!(server.address().starts_with("tcp://127.0.0.1:"));
        assert!(!server.address().ends_with(":0"));
        assert!(server.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_unknown_peer() {
        let server = HolonRpcServer::start("tcp://127.0.0.1:0", HandlerTable::new())
            .await
            .unwrap();
        let err = server
            .invoke(42, "client.v1.Client/Hello", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, HolonError::UnknownPeer(42)));
    }

    #[tokio::test]
    async fn test_echo_over_private_mem_registry() {
        let registry = MemRegistry::new();
        let handlers = HandlerTable::new();
        handlers.register("echo.v1.Echo/Ping", |params: Value| async move { Ok(params) });
        let server = HolonRpcServer::start_with("mem://server-test", &registry, handlers)
            .await
            .unwrap();
        assert_eq!(server.address(), "mem://server-test");

        let client = HolonRpcClient::with_registry(ClientConfig::default(), registry);
        client.connect(server.address()).await.unwrap();

        let out = client
            .invoke("echo.v1.Echo/Ping", json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"message": "hello"}));
        assert_eq!(server.peer_ids(), vec![1]);

        client.close().await;
    }

    #[tokio::test]
    async fn test_ws_server_starts_but_never_accepts() {
        let server = HolonRpcServer::start("ws://127.0.0.1:8080/holon", HandlerTable::new())
            .await
            .unwrap();
        assert_eq!(server.address(), "ws://127.0.0.1:8080/holon");
        assert!(server.peer_ids().is_empty());
    }
}
