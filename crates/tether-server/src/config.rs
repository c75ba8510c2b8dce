//! Server configuration.

use std::time::Duration;

use tether_core::mcp::Implementation;
use tether_settings::{ResponseDelivery, ServerSettings};

use crate::heartbeat::MIN_INTERVAL;

/// Runtime configuration for [`crate::server::TetherServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Partition tag announced to clients.
    pub partition: String,
    /// Interval between `heartbeat-ping` frames on each channel.
    pub heartbeat_interval: Duration,
    /// Sessions silent for longer than this are swept.
    pub session_max_age: Duration,
    /// How often the sweep loop runs.
    pub sweep_interval: Duration,
    /// Deadline for a single method handler.
    pub handler_timeout: Duration,
    /// Where responses to side-channel requests go.
    pub response_delivery: ResponseDelivery,
    /// Per-channel outbound frame buffer; frames beyond it are dropped.
    pub channel_buffer: usize,
    /// Name and version reported by `initialize` and the `init` frame.
    pub server_info: Implementation,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            ..Self::from(&ServerSettings::default())
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            partition: settings.partition.clone(),
            heartbeat_interval: interval(settings.heartbeat_interval_ms),
            session_max_age: Duration::from_millis(settings.session_max_age_ms),
            sweep_interval: interval(settings.sweep_interval_ms),
            handler_timeout: Duration::from_millis(settings.handler_timeout_ms),
            response_delivery: settings.response_delivery,
            channel_buffer: settings.channel_buffer.max(1),
            server_info: Implementation::new("tether", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn interval(ms: u64) -> Duration {
    Duration::from_millis(ms).max(MIN_INTERVAL)
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn durations_from_settings() {
        let settings = ServerSettings {
            heartbeat_interval_ms: 1_500,
            session_max_age_ms: 10_000,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(1_500));
        assert_eq!(cfg.session_max_age, Duration::from_secs(10));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.handler_timeout, Duration::from_secs(60));
        assert_eq!(cfg.port, 8787);
    }

    #[test]
    fn zero_buffer_is_clamped() {
        let settings = ServerSettings {
            channel_buffer: 0,
            ..ServerSettings::default()
        };
        assert_eq!(ServerConfig::from(&settings).channel_buffer, 1);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let settings = ServerSettings {
            heartbeat_interval_ms: 0,
            sweep_interval_ms: 0,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.heartbeat_interval, MIN_INTERVAL);
        assert_eq!(cfg.sweep_interval, MIN_INTERVAL);
    }

    #[test]
    fn server_info_names_the_crate_version() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server_info.name, "tether");
        assert_eq!(cfg.server_info.version, env!("CARGO_PKG_VERSION"));
    }
}
