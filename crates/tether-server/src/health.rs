//! `/health` and `/capabilities` bodies.

use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};

use crate::rpc::handlers::server_capabilities;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"healthy"` while the server runs.
    pub status: &'static str,
    /// RFC 3339 time of the check.
    pub timestamp: String,
    /// Partition tag.
    pub partition: String,
    /// Server version.
    pub version: String,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Open channel sessions.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, partition: &str, version: &str, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        partition: partition.to_owned(),
        version: version.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

/// `/capabilities` body.
pub fn capabilities(partition: &str) -> Value {
    json!({ "capabilities": server_capabilities(partition) })
}
