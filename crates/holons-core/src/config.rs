//! Centralized configuration for Holon RPC.
//!
//! Transport defaults and wire limits live in [`TransportConfig`]; per-client
//! timing knobs live in [`ClientConfig`], which can also be deserialized from
//! JSON with every field optional.

use serde::Deserialize;
use std::time::Duration;

/// Transport URI defaults and wire limits.
pub struct TransportConfig;

impl TransportConfig {
    pub const DEFAULT_URI: &'static str = "tcp://:9090";
    pub const DEFAULT_TCP_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_TCP_PORT: u16 = 9090;
    pub const DEFAULT_WS_PORT: u16 = 80;
    pub const DEFAULT_WSS_PORT: u16 = 443;
    pub const DEFAULT_WS_PATH: &'static str = "/grpc";

    /// Upper bound for a single frame payload.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Buffer size of each direction of an in-memory channel.
    pub const MEM_CHANNEL_CAPACITY: usize = 64 * 1024;
}

/// Default timings for the RPC engine.
pub struct RpcConfig;

impl RpcConfig {
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const RECONNECT_MIN_DELAY: Duration = Duration::from_millis(500);
    pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Timing configuration for a [`HolonRpcClient`](crate::rpc::HolonRpcClient).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Interval between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for a pong after a ping before declaring the peer dead.
    pub heartbeat_timeout_ms: u64,
    /// First reconnect delay, also used again after every successful reconnect.
    pub reconnect_min_delay_ms: u64,
    /// Cap for the doubling reconnect delay.
    pub reconnect_max_delay_ms: u64,
    /// Timeout applied by `invoke` when the caller does not pass one.
    pub invoke_timeout_ms: u64,
    /// Randomize reconnect delays by a factor in `0.5..1.5` (still capped).
    pub reconnect_jitter: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: RpcConfig::HEARTBEAT_INTERVAL.as_millis() as u64,
            heartbeat_timeout_ms: RpcConfig::HEARTBEAT_TIMEOUT.as_millis() as u64,
            reconnect_min_delay_ms: RpcConfig::RECONNECT_MIN_DELAY.as_millis() as u64,
            reconnect_max_delay_ms: RpcConfig::RECONNECT_MAX_DELAY.as_millis() as u64,
            invoke_timeout_ms: RpcConfig::INVOKE_TIMEOUT.as_millis() as u64,
            reconnect_jitter: false,
        }
    }
}

impl ClientConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat ping interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the pong deadline measured from each ping.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the reconnect delay bounds.
    pub fn with_reconnect_delays(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min_delay_ms = min.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set the default `invoke` timeout.
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable reconnect jitter.
    pub fn with_reconnect_jitter(mut self, jitter: bool) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.max(1))
    }

    pub fn reconnect_min_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_delay_ms.max(1))
    }

    /// Never below [`ClientConfig::reconnect_min_delay`].
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms).max(self.reconnect_min_delay())
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}
