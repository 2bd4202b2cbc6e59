//! Echo service handlers.

use holons::{current_peer, HandlerTable, RpcError};
use serde_json::{json, Value};
use std::time::Duration;

pub const ECHO_PING: &str = "echo.v1.Echo/Ping";
pub const ECHO_HEARTBEAT_COUNT: &str = "echo.v1.Echo/HeartbeatCount";
pub const ECHO_CALL_CLIENT: &str = "echo.v1.Echo/CallClient";
pub const CLIENT_HELLO: &str = "client.v1.Client/Hello";

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler table of the echo service.
pub fn echo_handlers() -> HandlerTable {
    let handlers = HandlerTable::new();

    handlers.register(ECHO_PING, |params: Value| async move { Ok(params) });

    handlers.register(ECHO_HEARTBEAT_COUNT, |_: Value| async move {
        let peer = current_peer().ok_or_else(|| RpcError::internal("no calling peer"))?;
        Ok(json!({ "count": peer.heartbeats_received() }))
    });

    handlers.register(ECHO_CALL_CLIENT, |_: Value| async move {
        let peer = current_peer().ok_or_else(|| RpcError::internal("no calling peer"))?;
        peer.invoke(CLIENT_HELLO, json!({ "name": "rust" }), CALLBACK_TIMEOUT)
            .await
            .map_err(RpcError::from)
    });

    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_echoes_params() {
        let handlers = echo_handlers();
        let out = handlers
            .dispatch(ECHO_PING, json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn test_peer_handlers_need_a_peer() {
        let handlers = echo_handlers();
        let err = handlers
            .dispatch(ECHO_HEARTBEAT_COUNT, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, holons::rpc::protocol::INTERNAL_ERROR);
    }

    #[test]
    fn test_methods_registered() {
        assert_eq!(
            echo_handlers().methods(),
            vec![
                ECHO_CALL_CLIENT.to_string(),
                ECHO_HEARTBEAT_COUNT.to_string(),
                ECHO_PING.to_string()
            ]
        );
    }
}
