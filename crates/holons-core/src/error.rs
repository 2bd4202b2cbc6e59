//! Error types for Holon RPC.
//!
//! One enum covers the whole taxonomy: synchronous parse and transport
//! errors, connection-level failures that the reconnect supervisor recovers
//! from, and the errors surfaced by `invoke`.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the holons library.
#[derive(Debug, Error)]
pub enum HolonError {
    // URI and transport selection
    #[error("Invalid transport URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Unsupported transport: {scheme}")]
    UnsupportedTransport { scheme: String },

    #[error("Listener {address} already accepted its only connection")]
    AlreadyAccepted { address: String },

    // Connection-level errors
    #[error("Failed to connect to {uri}: {message}")]
    Connect { uri: String, message: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    #[error("Heartbeat timeout: no pong within {0:?}")]
    HeartbeatTimeout(Duration),

    // Engine state errors
    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Client is not connected")]
    NotConnected,

    #[error("Connection lost before a response arrived")]
    Disconnected,

    #[error("Client is closed")]
    Closed,

    #[error("Peer {0} is not connected")]
    UnknownPeer(u64),

    // Call outcomes
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Identity parse error: {message}")]
    Identity { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for holons operations.
pub type Result<T> = std::result::Result<T, HolonError>;

impl From<std::io::Error> for HolonError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => HolonError::ConnectionClosed,
            _ => HolonError::Io {
                message: err.to_string(),
                source: Some(err),
            },
        }
    }
}

impl From<serde_json::Error> for HolonError {
    fn from(err: serde_json::Error) -> Self {
        HolonError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl HolonError {
    /// Build an `InvalidUri` error.
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        HolonError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Build a `MalformedFrame` error.
    pub fn malformed(message: impl Into<String>) -> Self {
        HolonError::MalformedFrame {
            message: message.into(),
        }
    }

    /// Convert to a wire error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Transport-level failures use -32000. A `Remote` error keeps the
    /// code the peer sent.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            HolonError::Remote { code, .. } => *code,

            HolonError::MalformedFrame { .. } => -32700,

            HolonError::Json { .. } => -32602,

            HolonError::Connect { .. }
            | HolonError::ConnectionClosed
            | HolonError::Io { .. }
            | HolonError::HeartbeatTimeout(_)
            | HolonError::NotConnected
            | HolonError::Disconnected
            | HolonError::Closed
            | HolonError::UnknownPeer(_)
            | HolonError::Timeout(_) => -32000,

            _ => -32603,
        }
    }

    /// Check if this error is a connection-level failure that the
    /// reconnect supervisor recovers from.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HolonError::Connect { .. }
                | HolonError::ConnectionClosed
                | HolonError::Io { .. }
                | HolonError::MalformedFrame { .. }
                | HolonError::HeartbeatTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HolonError::invalid_uri("ftp://host", "unsupported scheme \"ftp\"");
        assert_eq!(
            err.to_string(),
            "Invalid transport URI \"ftp://host\": unsupported scheme \"ftp\""
        );
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            HolonError::Remote {
                code: -32601,
                message: "nope".into()
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(HolonError::malformed("bad").to_rpc_error_code(), -32700);
        assert_eq!(HolonError::Other("boom".into()).to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_io_eof_maps_to_connection_closed() {
        let err: HolonError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, HolonError::ConnectionClosed));

        let err: HolonError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, HolonError::Io { .. }));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(HolonError::ConnectionClosed.is_retryable());
        assert!(HolonError::HeartbeatTimeout(Duration::from_millis(200)).is_retryable());
        assert!(!HolonError::NotConnected.is_retryable());
        assert!(!HolonError::invalid_uri("x", "y").is_retryable());
    }
}
