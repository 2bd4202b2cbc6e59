//! Transport URI parsing.
//!
//! ```text
//! tcp://[host][:port]          host 0.0.0.0, port 9090
//! unix://<path>                path required
//! stdio://                     canonical, no host/port
//! mem://[name]                 canonical mem:// or mem://<name>
//! ws://host[:port][/path]      port 80, path /grpc
//! wss://host[:port][/path]     port 443, path /grpc
//! ```

use crate::config::TransportConfig;
use crate::{HolonError, Result};

/// Supported transport schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Unix,
    Stdio,
    Mem,
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Unix => "unix",
            Scheme::Stdio => "stdio",
            Scheme::Mem => "mem",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Scheme::Tcp),
            "unix" => Ok(Scheme::Unix),
            "stdio" => Ok(Scheme::Stdio),
            "mem" => Ok(Scheme::Mem),
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            other => Err(format!("unsupported scheme {:?}", other)),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized transport URI.
///
/// For `unix` the socket path is in `path`; for `mem` the optional channel
/// name is in `path`. Use [`ParsedUri::address`] for the canonical string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub raw: String,
    pub scheme: Scheme,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub secure: bool,
}

impl ParsedUri {
    /// Canonical address string with all defaults applied.
    pub fn address(&self) -> String {
        match self.scheme {
            Scheme::Tcp => format!(
                "tcp://{}:{}",
                self.host.as_deref().unwrap_or(TransportConfig::DEFAULT_TCP_HOST),
                self.port.unwrap_or(TransportConfig::DEFAULT_TCP_PORT)
            ),
            Scheme::Unix => format!("unix://{}", self.path.as_deref().unwrap_or_default()),
            Scheme::Stdio => "stdio://".to_string(),
            Scheme::Mem => format!("mem://{}", self.path.as_deref().unwrap_or_default()),
            Scheme::Ws | Scheme::Wss => format!(
                "{}://{}:{}{}",
                self.scheme,
                self.host.as_deref().unwrap_or_default(),
                self.port.unwrap_or_default(),
                self.path.as_deref().unwrap_or(TransportConfig::DEFAULT_WS_PATH)
            ),
        }
    }
}

/// Extract the scheme from a transport URI.
///
/// Returns the substring before `://`, or the whole string when there is no
/// separator.
pub fn scheme(uri: &str) -> &str {
    match uri.find("://") {
        Some(idx) => &uri[..idx],
        None => uri,
    }
}

/// Parse a transport URI, applying per-scheme defaults.
pub fn parse(uri: &str) -> Result<ParsedUri> {
    let Some((raw_scheme, body)) = uri.split_once("://") else {
        return Err(HolonError::invalid_uri(uri, "missing scheme separator \"://\""));
    };
    let scheme: Scheme = raw_scheme
        .parse()
        .map_err(|reason: String| HolonError::invalid_uri(uri, reason))?;

    let mut parsed = ParsedUri {
        raw: uri.to_string(),
        scheme,
        host: None,
        port: None,
        path: None,
        secure: false,
    };

    match scheme {
        Scheme::Tcp => {
            if body.contains('/') || body.chars().any(char::is_whitespace) {
                return Err(HolonError::invalid_uri(uri, "tcp address must be [host][:port]"));
            }
            let (host, port) = split_host_port(body, TransportConfig::DEFAULT_TCP_PORT)
                .map_err(|reason| HolonError::invalid_uri(uri, reason))?;
            parsed.host = Some(host);
            parsed.port = Some(port);
        }
        Scheme::Unix => {
            if body.is_empty() {
                return Err(HolonError::invalid_uri(uri, "unix socket path is empty"));
            }
            parsed.path = Some(body.to_string());
        }
        Scheme::Stdio => {}
        Scheme::Mem => {
            let name = body.trim_matches('/');
            if !name.is_empty() {
                parsed.path = Some(name.to_string());
            }
        }
        Scheme::Ws | Scheme::Wss => {
            let secure = scheme == Scheme::Wss;
            let default_port = if secure {
                TransportConfig::DEFAULT_WSS_PORT
            } else {
                TransportConfig::DEFAULT_WS_PORT
            };
            let (authority, path) = match body.split_once('/') {
                Some((authority, rest)) => (authority, rest),
                None => (body, ""),
            };
            if authority.is_empty() {
                return Err(HolonError::invalid_uri(uri, "websocket host is empty"));
            }
            let (host, port) = split_host_port(authority, default_port)
                .map_err(|reason| HolonError::invalid_uri(uri, reason))?;
            parsed.host = Some(host);
            parsed.port = Some(port);
            parsed.path = Some(if path.is_empty() {
                TransportConfig::DEFAULT_WS_PATH.to_string()
            } else {
                format!("/{}", path)
            });
            parsed.secure = secure;
        }
    }

    Ok(parsed)
}

/// Split `host[:port]` into its parts.
///
/// Empty input yields the wildcard host and `default_port`; a missing or
/// empty port segment yields `default_port`. Bracketed IPv6 hosts are
/// unwrapped.
pub fn split_host_port(addr: &str, default_port: u16) -> std::result::Result<(String, u16), String> {
    if addr.is_empty() {
        return Ok((TransportConfig::DEFAULT_TCP_HOST.to_string(), default_port));
    }

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 host in {:?}", addr))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(format!("unexpected {:?} after IPv6 host", tail)),
            },
        }
    } else {
        match addr.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    let host = if host.is_empty() {
        TransportConfig::DEFAULT_TCP_HOST.to_string()
    } else {
        host.to_string()
    };

    let port = match port {
        None | Some("") => default_port,
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| format!("invalid port {:?}", port))?,
    };

    Ok((host, port))
}
