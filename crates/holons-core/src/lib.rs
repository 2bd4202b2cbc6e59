//! Holons - peer-to-peer bidirectional RPC over pluggable transports.
//!
//! A transport URI (`tcp://`, `unix://`, `stdio://`, `mem://`, `ws://`,
//! `wss://`) selects how bytes move; the RPC layer on top lets either peer
//! call methods the other registered, with heartbeats and automatic
//! reconnection on the client side.
//!
//! # Example
//!
//! ```rust,ignore
//! use holons::{ClientConfig, HandlerTable, HolonRpcClient, HolonRpcServer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> holons::Result<()> {
//!     let handlers = HandlerTable::new();
//!     handlers.register("echo.v1.Echo/Ping", |params| async move { Ok(params) });
//!     let server = HolonRpcServer::start("tcp://127.0.0.1:0", handlers).await?;
//!
//!     let client = HolonRpcClient::new(ClientConfig::default());
//!     client.connect(server.address()).await?;
//!     let reply = client.invoke("echo.v1.Echo/Ping", json!({"message": "hello"})).await?;
//!     println!("{}", reply);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod rpc;
pub mod serve;
pub mod transport;

// Re-export commonly used types
pub use config::{ClientConfig, RpcConfig, TransportConfig};
pub use error::{HolonError, Result};
pub use identity::{parse_holon, HolonIdentity};
pub use rpc::{
    current_peer, ClientState, HandlerTable, HolonRpcClient, HolonRpcServer,
    HolonRpcServerHandle, PeerHandle, RpcError,
};
pub use transport::{dial, listen, Connection, Listener, ParsedUri, Scheme, DEFAULT_URI};
