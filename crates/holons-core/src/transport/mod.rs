//! Transport abstraction.
//!
//! A transport URI selects one of a closed set of byte-stream transports:
//!
//! - **tcp**: `tokio::net` TCP sockets
//! - **unix**: Unix domain sockets (Unix platforms only)
//! - **stdio**: the process's stdin/stdout, single connection
//! - **mem**: in-process duplex channels paired through a [`MemRegistry`]
//! - **ws/wss**: parsed and listed, but never opened at runtime
//!
//! [`listen`] produces a [`Listener`], [`dial`] produces the client side
//! [`Connection`].

mod connection;
mod listener;
mod memory;
mod uri;

pub use connection::{Connection, StdioStream};
pub use listener::{Listener, MemListener, StdioListener, WsListener};
pub use memory::MemRegistry;
pub use uri::{parse, scheme, split_host_port, ParsedUri, Scheme};

use crate::config::TransportConfig;
use crate::{HolonError, Result};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

/// Default listen URI when nothing else is configured.
pub const DEFAULT_URI: &str = TransportConfig::DEFAULT_URI;

/// Parse `uri` and open a listener for it, using the global memory registry.
pub async fn listen(uri: &str) -> Result<Listener> {
    listen_with(uri, &MemRegistry::global()).await
}

/// Parse `uri` and open a listener for it, pairing memory transports
/// through `registry`.
pub async fn listen_with(uri: &str, registry: &MemRegistry) -> Result<Listener> {
    let parsed = parse(uri)?;

    match parsed.scheme {
        Scheme::Tcp => {
            let host = parsed.host.as_deref().unwrap_or(TransportConfig::DEFAULT_TCP_HOST);
            let port = parsed.port.unwrap_or(TransportConfig::DEFAULT_TCP_PORT);
            let listener = tokio::net::TcpListener::bind((host, port)).await?;
            info!("listening on tcp://{}", listener.local_addr()?);
            Ok(Listener::Tcp(listener))
        }
        #[cfg(unix)]
        Scheme::Unix => {
            let path = std::path::PathBuf::from(parsed.path.unwrap_or_default());
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path)?;
            info!("listening on unix://{}", path.display());
            Ok(Listener::Unix { listener, path })
        }
        #[cfg(not(unix))]
        Scheme::Unix => Err(HolonError::UnsupportedTransport {
            scheme: "unix".to_string(),
        }),
        Scheme::Stdio => Ok(Listener::Stdio(StdioListener::new())),
        Scheme::Mem => Ok(Listener::Mem(MemListener::new(
            parsed.address(),
            registry.clone(),
        ))),
        Scheme::Ws | Scheme::Wss => Ok(Listener::Ws(WsListener {
            host: parsed.host.unwrap_or_default(),
            port: parsed.port.unwrap_or_default(),
            path: parsed
                .path
                .unwrap_or_else(|| TransportConfig::DEFAULT_WS_PATH.to_string()),
            secure: parsed.secure,
        })),
    }
}

/// Open the client side of `uri`, using the global memory registry.
pub async fn dial(uri: &str) -> Result<Connection> {
    dial_with(uri, &MemRegistry::global()).await
}

/// Open the client side of `uri`.
///
/// Reachability failures become `HolonError::Connect`. A memory dial waits
/// until a listener accepts on the same address.
pub async fn dial_with(uri: &str, registry: &MemRegistry) -> Result<Connection> {
    let parsed = parse(uri)?;
    let connect_err = |e: std::io::Error| HolonError::Connect {
        uri: uri.to_string(),
        message: e.to_string(),
    };

    let conn = match parsed.scheme {
        Scheme::Tcp => {
            let host = match parsed.host.as_deref() {
                None | Some("0.0.0.0") => "127.0.0.1",
                Some("::") => "::1",
                Some(host) => host,
            };
            let port = parsed.port.unwrap_or(TransportConfig::DEFAULT_TCP_PORT);
            let stream = TcpStream::connect((host, port)).await.map_err(connect_err)?;
            let _ = stream.set_nodelay(true);
            Connection::Tcp(stream)
        }
        #[cfg(unix)]
        Scheme::Unix => {
            let path = parsed.path.as_deref().unwrap_or_default();
            Connection::Unix(UnixStream::connect(path).await.map_err(connect_err)?)
        }
        #[cfg(not(unix))]
        Scheme::Unix => {
            return Err(HolonError::UnsupportedTransport {
                scheme: "unix".to_string(),
            })
        }
        Scheme::Stdio => Connection::Stdio(StdioStream::new()),
        Scheme::Mem => Connection::Mem(registry.dial(&parsed.address()).await?),
        Scheme::Ws | Scheme::Wss => {
            return Err(HolonError::UnsupportedTransport {
                scheme: parsed.scheme.to_string(),
            })
        }
    };

    debug!("dialed {}", parsed.address());
    Ok(conn)
}
