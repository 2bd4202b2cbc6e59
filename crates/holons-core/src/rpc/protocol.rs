//! Holon RPC wire format and framing.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! object tagged by `kind`:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//!
//! {"kind":"request","id":"c1","method":"echo.v1.Echo/Ping","params":{...}}
//! {"kind":"response","id":"c1","result":{...}}
//! {"kind":"error","id":"c1","code":-32601,"message":"..."}
//! {"kind":"ping","id":"h1"}
//! {"kind":"pong","id":"h1"}
//! ```

use crate::config::TransportConfig;
use crate::{HolonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire error code sent back when no handler is registered for a method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Wire error code for handler failures that carry no better code.
pub const INTERNAL_ERROR: i32 = -32603;
/// Wire error code for rejected parameters.
pub const INVALID_PARAMS: i32 = -32602;

/// One message carried by one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcMessage {
    Request {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: String,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: String,
        code: i32,
        message: String,
    },
    Ping {
        id: String,
    },
    Pong {
        id: String,
    },
}

impl RpcMessage {
    /// Correlation id of any message kind.
    pub fn id(&self) -> &str {
        match self {
            RpcMessage::Request { id, .. }
            | RpcMessage::Response { id, .. }
            | RpcMessage::Error { id, .. }
            | RpcMessage::Ping { id }
            | RpcMessage::Pong { id } => id,
        }
    }

    /// Build an error frame from a handler failure.
    pub fn error(id: impl Into<String>, error: RpcError) -> Self {
        RpcMessage::Error {
            id: id.into(),
            code: error.code,
            message: error.message,
        }
    }
}

/// Error object a handler returns; it travels to the caller as an `error`
/// frame and surfaces there as `HolonError::Remote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl From<HolonError> for RpcError {
    fn from(err: HolonError) -> Self {
        match err {
            HolonError::Remote { code, message } => Self::new(code, message),
            other => Self::new(other.to_rpc_error_code(), other.to_string()),
        }
    }
}

/// Serialize a message into a complete frame.
pub fn encode(message: &RpcMessage) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(HolonError::malformed(format!(
            "frame size {} exceeds maximum {}",
            payload.len(),
            TransportConfig::MAX_FRAME_SIZE
        )));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parse a frame payload (without its length prefix).
pub fn decode(payload: &[u8]) -> Result<RpcMessage> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| HolonError::malformed("invalid UTF-8 in frame"))?;
    serde_json::from_str(text).map_err(|e| HolonError::malformed(e.to_string()))
}

/// Read one length-prefixed payload.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// End of stream, whether at a frame boundary or mid-frame, is
/// `ConnectionClosed`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(HolonError::malformed(format!(
            "frame size {} exceeds maximum {}",
            len,
            TransportConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Read and decode the next message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<RpcMessage> {
    let payload = read_frame(reader).await?;
    decode(&payload)
}

/// Encode and write one message, then flush.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &RpcMessage) -> Result<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let msg = RpcMessage::Request {
            id: "c1".to_string(),
            method: "echo.v1.Echo/Ping".to_string(),
            params: json!({"message": "hello"}),
        };
        let frame = encode(&msg).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let payload: Value = serde_json::from_slice(&frame[4..]).unwrap();
        assert_eq!(payload["kind"], "request");
        assert_eq!(payload["method"], "echo.v1.Echo/Ping");
        assert_eq!(payload["params"]["message"], "hello");
    }

    #[test]
    fn test_missing_params_default_to_null() {
        let msg = decode(br#"{"kind":"request","id":"7","method":"m"}"#).unwrap();
        assert_eq!(
            msg,
            RpcMessage::Request {
                id: "7".to_string(),
                method: "m".to_string(),
                params: Value::Null,
            }
        );
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let result = decode(br#"{"kind":"notify","id":"1"}"#);
        assert!(matches!(result, Err(HolonError::MalformedFrame { .. })));

        let result = decode(b"not json");
        assert!(matches!(result, Err(HolonError::MalformedFrame { .. })));

        let result = decode(&[0xff, 0xfe]);
        assert!(matches!(result, Err(HolonError::MalformedFrame { .. })));
    }

    #[test]
    fn test_rpc_error_from_holon_error() {
        let err = RpcError::from(HolonError::Remote {
            code: 42,
            message: "nope".to_string(),
        });
        assert_eq!(err, RpcError::new(42, "nope"));

        let err = RpcError::from(HolonError::Other("boom".to_string()));
        assert_eq!(err.code, INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_write_then_read_message() {
        let mut buf = Vec::new();
        let ping = RpcMessage::Ping { id: "h1".to_string() };
        write_message(&mut buf, &ping).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_message(&mut cursor).await.unwrap(), ping);
    }

    #[tokio::test]
    async fn test_read_empty_stream_is_connection_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(HolonError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_truncated_frame_is_connection_closed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await, Err(HolonError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_oversized_returns_malformed() {
        let huge_len = (TransportConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(HolonError::MalformedFrame { .. })));
    }
}
