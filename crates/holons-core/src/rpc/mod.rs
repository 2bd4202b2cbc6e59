//! Bidirectional Holon RPC over any byte-stream transport.
//!
//! # Architecture
//!
//! - **Protocol**: length-prefixed JSON frames (request, response, error, ping, pong)
//! - **Session**: one connection generation; read loop, correlation table, heartbeat accounting
//! - **Client**: dials a URI, keeps it alive with heartbeats and reconnects with backoff
//! - **Server**: accepts peers on a listener and runs a session per peer
//!
//! Either side can register handlers and invoke methods on the other.

pub mod backoff;
pub mod client;
pub mod handlers;
pub mod pending;
pub mod protocol;
pub mod server;
mod session;

pub use backoff::Backoff;
pub use client::{ClientState, HolonRpcClient};
pub use handlers::{Handler, HandlerTable};
pub use pending::PendingCalls;
pub use protocol::{RpcError, RpcMessage};
pub use server::{HolonRpcServer, HolonRpcServerHandle};
pub use session::{current_peer, HeartbeatState, PeerHandle};
