//! Listener variants.
//!
//! TCP and Unix listeners own a bound socket. Stdio, memory and WebSocket
//! listeners only carry configuration: stdio hands out the process's
//! standard streams once, memory pairs with dials through a [`MemRegistry`],
//! and WebSocket has no runtime listener at all.

use super::connection::{Connection, StdioStream};
use super::memory::MemRegistry;
use super::uri::Scheme;
use crate::{HolonError, Result};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::debug;

/// Single-shot listener over the process's stdin/stdout.
#[derive(Debug)]
pub struct StdioListener {
    address: String,
    accepted: AtomicBool,
}

impl StdioListener {
    pub(crate) fn new() -> Self {
        Self {
            address: "stdio://".to_string(),
            accepted: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Listener bound to a named memory address.
#[derive(Debug, Clone)]
pub struct MemListener {
    address: String,
    registry: MemRegistry,
}

impl MemListener {
    pub(crate) fn new(address: String, registry: MemRegistry) -> Self {
        Self { address, registry }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Dial this listener's address through the same registry.
    pub async fn dial(&self) -> Result<Connection> {
        Ok(Connection::Mem(self.registry.dial(&self.address).await?))
    }
}

/// Configuration-only WebSocket listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsListener {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

/// A listening endpoint for one transport.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
    Stdio(StdioListener),
    Mem(MemListener),
    Ws(WsListener),
}

impl Listener {
    /// Transport scheme of this listener.
    pub fn scheme(&self) -> Scheme {
        match self {
            Listener::Tcp(_) => Scheme::Tcp,
            #[cfg(unix)]
            Listener::Unix { .. } => Scheme::Unix,
            Listener::Stdio(_) => Scheme::Stdio,
            Listener::Mem(_) => Scheme::Mem,
            Listener::Ws(ws) if ws.secure => Scheme::Wss,
            Listener::Ws(_) => Scheme::Ws,
        }
    }

    /// Bound socket address, for TCP listeners.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }

    /// Canonical address a peer can dial, with the resolved TCP port.
    pub fn address(&self) -> String {
        match self {
            Listener::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => format!("tcp://{}", addr),
                Err(_) => "tcp://".to_string(),
            },
            #[cfg(unix)]
            Listener::Unix { path, .. } => format!("unix://{}", path.display()),
            Listener::Stdio(stdio) => stdio.address().to_string(),
            Listener::Mem(mem) => mem.address().to_string(),
            Listener::Ws(ws) => format!(
                "{}://{}:{}{}",
                if ws.secure { "wss" } else { "ws" },
                ws.host,
                ws.port,
                ws.path
            ),
        }
    }

    /// Wait for the next incoming connection.
    pub async fn accept(&self) -> Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!("accepted tcp connection from {}", peer);
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                debug!("accepted unix connection on {}", path.display());
                Ok(Connection::Unix(stream))
            }
            Listener::Stdio(stdio) => {
                if stdio.accepted.swap(true, Ordering::SeqCst) {
                    return Err(HolonError::AlreadyAccepted {
                        address: stdio.address.clone(),
                    });
                }
                Ok(Connection::Stdio(StdioStream::new()))
            }
            Listener::Mem(mem) => {
                let stream = mem.registry.accept(&mem.address).await?;
                debug!("accepted memory connection on {}", mem.address);
                Ok(Connection::Mem(stream))
            }
            Listener::Ws(_) => Err(HolonError::UnsupportedTransport {
                scheme: self.scheme().to_string(),
            }),
        }
    }

    /// Release the listener. A Unix listener also removes its socket file.
    pub fn close(self) {
        #[cfg(unix)]
        if let Listener::Unix { listener, path } = self {
            drop(listener);
            let _ = std::fs::remove_file(&path);
        }
    }
}
