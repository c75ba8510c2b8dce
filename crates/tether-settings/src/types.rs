//! Settings structs.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! needs the keys it changes.

use serde::{Deserialize, Serialize};
use tether_core::logging::LogFormat;
use tether_core::retry::ReconnectPolicy;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Server-side settings.
    pub server: ServerSettings,
    /// Client-side settings.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Where the server sends the response to a request posted on the side channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseDelivery {
    /// In the HTTP response body only.
    Sync,
    /// On the push stream only; the POST is answered with 202.
    Push,
    /// Both; the client keeps whichever arrives first.
    #[default]
    Both,
}

impl ResponseDelivery {
    /// Whether the HTTP body carries the response.
    pub fn replies_inline(self) -> bool {
        matches!(self, Self::Sync | Self::Both)
    }

    /// Whether the push stream carries the response.
    pub fn pushes(self) -> bool {
        matches!(self, Self::Push | Self::Both)
    }
}

/// Server network and channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Deployment partition tag reported on health and init frames.
    pub partition: String,
    /// Interval between heartbeat pings on each channel.
    pub heartbeat_interval_ms: u64,
    /// Channels without a heartbeat for this long are swept.
    pub session_max_age_ms: u64,
    /// Interval of the background sweep.
    pub sweep_interval_ms: u64,
    /// Upper bound on a single handler invocation.
    pub handler_timeout_ms: u64,
    /// Response routing for side-channel requests.
    pub response_delivery: ResponseDelivery,
    /// Frames buffered per channel before new frames are dropped.
    pub channel_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            partition: "default".to_string(),
            heartbeat_interval_ms: 30_000,
            session_max_age_ms: 300_000,
            sweep_interval_ms: 60_000,
            handler_timeout_ms: 60_000,
            response_delivery: ResponseDelivery::Both,
            channel_buffer: 64,
        }
    }
}

/// Client connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request reply deadline.
    pub request_timeout_ms: u64,
    /// Deadline for `open()`, including retries.
    pub connect_timeout_ms: u64,
    /// Silence on the push stream after which it is treated as dead.
    pub idle_timeout_ms: u64,
    /// Reconnect behavior.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            idle_timeout_ms: 90_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 8787);
        assert_eq!(s.heartbeat_interval_ms, 30_000);
        assert_eq!(s.session_max_age_ms, 300_000);
        assert_eq!(s.response_delivery, ResponseDelivery::Both);
    }

    #[test]
    fn client_defaults() {
        let c = ClientSettings::default();
        assert_eq!(c.request_timeout_ms, 30_000);
        assert_eq!(c.reconnect.max_attempts, 10);
        assert_eq!(c.reconnect.base_delay_ms, 5_000);
    }

    #[test]
    fn delivery_routing() {
        assert!(ResponseDelivery::Both.replies_inline() && ResponseDelivery::Both.pushes());
        assert!(!ResponseDelivery::Push.replies_inline());
        assert!(!ResponseDelivery::Sync.pushes());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(TetherSettings::default()).unwrap();
        assert_eq!(value["server"]["heartbeatIntervalMs"], 30_000);
        assert_eq!(value["server"]["responseDelivery"], "both");
        assert_eq!(value["client"]["reconnect"]["maxAttempts"], 10);
        assert_eq!(value["logging"]["format"], "compact");
    }
}
