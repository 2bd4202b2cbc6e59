//! One connection generation between two peers.
//!
//! A [`Session`] owns the write half of a connection, the correlation table
//! of its outbound calls and its heartbeat accounting. Its read loop
//! processes frames in arrival order: requests are handed to handler tasks,
//! responses resolve pending calls, pings are answered inline.
//!
//! Both the client engine and the server run every connection through a
//! session, which is what makes calls bidirectional.

use super::handlers::HandlerTable;
use super::pending::PendingCalls;
use super::protocol::{self, RpcError, RpcMessage};
use crate::transport::Connection;
use crate::{HolonError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

tokio::task_local! {
    static CURRENT_PEER: PeerHandle;
}

/// The peer whose request the current handler task is serving.
///
/// Returns `None` outside of a handler.
pub fn current_peer() -> Option<PeerHandle> {
    CURRENT_PEER.try_with(|peer| peer.clone()).ok()
}

/// Heartbeat accounting of one session.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    pub last_ping_sent_at: Option<Instant>,
    pub last_pong_received_at: Option<Instant>,
    /// Pings this side has sent.
    pub ping_counter: u64,
    /// Highest ping number the peer has answered.
    pub last_answered_ping: u64,
    /// Pings the peer has sent to this side.
    pub pings_received: u64,
}

pub(crate) struct Session {
    id: u64,
    writer: tokio::sync::Mutex<Option<WriteHalf<Connection>>>,
    pending: PendingCalls,
    heartbeat: Mutex<HeartbeatState>,
    pong: Notify,
    closed: watch::Sender<bool>,
    next_call: AtomicU64,
}

impl Session {
    /// Wrap `conn` and return the session plus the read half its read loop
    /// consumes.
    pub(crate) fn new(id: u64, conn: Connection) -> (Arc<Self>, ReadHalf<Connection>) {
        let (reader, writer) = tokio::io::split(conn);
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id,
            writer: tokio::sync::Mutex::new(Some(writer)),
            pending: PendingCalls::new(),
            heartbeat: Mutex::new(HeartbeatState::default()),
            pong: Notify::new(),
            closed,
            next_call: AtomicU64::new(1),
        });
        (session, reader)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub(crate) fn heartbeat(&self) -> HeartbeatState {
        self.heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_heartbeat(&self, f: impl FnOnce(&mut HeartbeatState)) {
        let mut state = self
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }

    /// Encode and write one message.
    pub(crate) async fn send(&self, message: &RpcMessage) -> Result<()> {
        let frame = protocol::encode(message)?;
        self.send_frame(&frame).await
    }

    /// Write one encoded frame. Writers are serialized so frames never
    /// interleave.
    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(HolonError::ConnectionClosed)?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its correlated outcome.
    pub(crate) async fn invoke(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if self.is_closed() {
            return Err(HolonError::Disconnected);
        }

        let id = format!("c{}", self.next_call.fetch_add(1, Ordering::Relaxed));
        let rx = self.pending.register(&id, timeout)?;
        if self.is_closed() {
            // close() may already have drained the table.
            self.pending.remove(&id);
            return Err(HolonError::Disconnected);
        }

        let request = RpcMessage::Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        // A request that cannot be framed never reaches the wire, so the
        // connection stays usable.
        let frame = match protocol::encode(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e);
            }
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.pending.remove(&id);
            debug!("session {}: failed to send {} ({}): {}", self.id, method, id, e);
            return Err(HolonError::Disconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HolonError::Disconnected),
            Err(_) => {
                self.pending.remove(&id);
                Err(HolonError::Timeout(timeout))
            }
        }
    }

    /// Send a heartbeat ping and return its number.
    ///
    /// The ping is recorded before it is written, so a pong that races
    /// the write still counts.
    pub(crate) async fn ping(&self) -> Result<u64> {
        let number = {
            let mut state = self
                .heartbeat
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.ping_counter += 1;
            state.last_ping_sent_at = Some(Instant::now());
            state.ping_counter
        };
        self.send(&RpcMessage::Ping {
            id: format!("h{}", number),
        })
        .await?;
        Ok(number)
    }

    /// Wait until ping `number` (or a later one) is answered or `deadline`
    /// passes.
    pub(crate) async fn await_pong(&self, number: u64, deadline: Instant) -> bool {
        loop {
            let notified = self.pong.notified();
            if self.heartbeat().last_answered_ping >= number {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return self.heartbeat().last_answered_ping >= number;
                }
            }
        }
    }

    /// Read and dispatch frames until the connection fails or the session
    /// is closed. Returns the reason the loop stopped.
    pub(crate) async fn run_read_loop(
        self: Arc<Self>,
        mut reader: ReadHalf<Connection>,
        handlers: HandlerTable,
    ) -> HolonError {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return HolonError::Closed;
            }
            let message = tokio::select! {
                result = protocol::read_message(&mut reader) => match result {
                    Ok(message) => message,
                    Err(e) => return e,
                },
                _ = closed.changed() => return HolonError::Closed,
            };
            self.handle_message(message, &handlers).await;
        }
    }

    async fn handle_message(self: &Arc<Self>, message: RpcMessage, handlers: &HandlerTable) {
        match message {
            RpcMessage::Request { id, method, params } => {
                trace!("session {}: request {} {}", self.id, id, method);
                let session = Arc::clone(self);
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    let peer = PeerHandle {
                        session: Arc::clone(&session),
                    };
                    let outcome = CURRENT_PEER
                        .scope(peer, handlers.dispatch(&method, params))
                        .await;
                    let reply = match outcome {
                        Ok(result) => RpcMessage::Response { id: id.clone(), result },
                        Err(error) => {
                            debug!("session {}: {} failed: {}", session.id, method, error);
                            RpcMessage::error(id.clone(), error)
                        }
                    };
                    let sent = match protocol::encode(&reply) {
                        Ok(frame) => session.send_frame(&frame).await,
                        Err(e) => {
                            // The caller still gets an answer for its id.
                            debug!("session {}: reply to {} not framed: {}", session.id, method, e);
                            let error = RpcError::internal(format!("reply not sent: {}", e));
                            session.send(&RpcMessage::error(id, error)).await
                        }
                    };
                    if let Err(e) = sent {
                        debug!("session {}: could not reply to {}: {}", session.id, method, e);
                    }
                });
            }
            RpcMessage::Response { id, result } => {
                if !self.pending.resolve(&id, Ok(result)) {
                    debug!("session {}: dropping response for unknown id {}", self.id, id);
                }
            }
            RpcMessage::Error { id, code, message } => {
                if !self.pending.resolve(&id, Err(HolonError::Remote { code, message })) {
                    debug!("session {}: dropping error for unknown id {}", self.id, id);
                }
            }
            RpcMessage::Ping { id } => {
                self.update_heartbeat(|state| state.pings_received += 1);
                if let Err(e) = self.send(&RpcMessage::Pong { id }).await {
                    debug!("session {}: could not answer ping: {}", self.id, e);
                }
            }
            RpcMessage::Pong { id } => {
                trace!("session {}: pong {}", self.id, id);
                let number = id
                    .strip_prefix('h')
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or_default();
                self.update_heartbeat(|state| {
                    state.last_pong_received_at = Some(Instant::now());
                    state.last_answered_ping = state.last_answered_ping.max(number);
                });
                self.pong.notify_one();
            }
        }
    }

    /// Tear the session down: stop the read loop, fail every pending call
    /// with `reason`, and close the connection.
    ///
    /// Only the first call picks the error pending calls fail with.
    pub(crate) async fn close(&self, reason: impl Fn() -> HolonError) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            let failed = self.pending.fail_all(reason);
            if failed > 0 {
                debug!("session {}: failed {} pending calls", self.id, failed);
            }
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                trace!("session {}: shutdown: {}", self.id, e);
            }
        }
    }
}

/// Handle to a connected peer, usable to call methods it registered.
#[derive(Clone)]
pub struct PeerHandle {
    session: Arc<Session>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle").field("id", &self.session.id).finish()
    }
}

impl PeerHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Server-assigned peer id (or connection generation on a client).
    pub fn id(&self) -> u64 {
        self.session.id()
    }

    /// Call `method` on the peer.
    pub async fn invoke(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.session.invoke(method, params, timeout).await
    }

    /// Heartbeat pings this peer has sent on the current connection.
    pub fn heartbeats_received(&self) -> u64 {
        self.session.heartbeat().pings_received
    }

    /// Snapshot of the heartbeat accounting.
    pub fn heartbeat(&self) -> HeartbeatState {
        self.session.heartbeat()
    }

    pub fn is_connected(&self) -> bool {
        !self.session.is_closed()
    }
}
