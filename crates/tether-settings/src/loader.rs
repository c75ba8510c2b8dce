//! Settings loading with deep merge and environment overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_core::logging::LogFormat;
use tether_core::retry::BackoffStrategy;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{ResponseDelivery, TetherSettings};

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with process env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Load settings from `path`, resolving overrides through `lookup`.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<TetherSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, &lookup);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, value) in source_map.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match target_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` overrides. Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut TetherSettings, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("TETHER_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("TETHER_PARTITION") {
        settings.server.partition = v;
    }
    if let Some(v) = env.parsed("TETHER_HEARTBEAT_INTERVAL_MS", |s| parse_range::<u64>(s, 100, 600_000)) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.parsed("TETHER_SESSION_MAX_AGE_MS", |s| parse_range::<u64>(s, 1_000, 86_400_000)) {
        settings.server.session_max_age_ms = v;
    }
    if let Some(v) = env.parsed("TETHER_RESPONSE_DELIVERY", parse_delivery) {
        settings.server.response_delivery = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_URL") {
        settings.client.base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = env.parsed("TETHER_REQUEST_TIMEOUT_MS", |s| parse_range::<u64>(s, 100, 3_600_000)) {
        settings.client.request_timeout_ms = v;
    }
    if let Some(v) = env.parsed("TETHER_CONNECT_TIMEOUT_MS", |s| parse_range::<u64>(s, 100, 3_600_000)) {
        settings.client.connect_timeout_ms = v;
    }
    if let Some(v) = env.parsed("TETHER_MAX_RECONNECT_ATTEMPTS", |s| parse_range::<u32>(s, 0, 1_000)) {
        settings.client.reconnect.max_attempts = v;
    }
    if let Some(v) = env.parsed("TETHER_RECONNECT_INTERVAL_MS", |s| parse_range::<u64>(s, 10, 600_000)) {
        settings.client.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.parsed("TETHER_RECONNECT_BACKOFF", BackoffStrategy::parse) {
        settings.client.reconnect.strategy = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("TETHER_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────

/// Parse an integer within `[min, max]`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `sync` / `push` / `both`.
pub fn parse_delivery(val: &str) -> Option<ResponseDelivery> {
    match val.to_ascii_lowercase().as_str() {
        "sync" => Some(ResponseDelivery::Sync),
        "push" => Some(ResponseDelivery::Push),
        "both" => Some(ResponseDelivery::Both),
        _ => None,
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(key)?;
        let parsed = parse(&val);
        if parsed.is_none() {
            warn!(key, value = %val, "invalid env override, ignoring");
        }
        parsed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
