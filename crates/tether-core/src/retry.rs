//! Reconnect policy and backoff calculation.
//!
//! Pure math only; the async reconnect loop lives in `tether-client`.
//!
//! - [`ReconnectPolicy`]: retry bound, delays, strategy
//! - [`calculate_backoff_delay`]: exponential backoff capped at a maximum
//! - [`apply_jitter`]: spread a delay by a caller-supplied random factor

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of reconnect attempts after the initial connection.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default delay between attempts in ms.
pub const DEFAULT_BASE_DELAY_MS: u64 = 5_000;
/// Default cap on the delay in ms.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// How the delay grows between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// `base * 2^(attempt - 1)`, capped.
    Exponential,
}

impl BackoffStrategy {
    /// Parse `"fixed"` / `"exponential"` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Reconnect parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Retries after the initial attempt before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in ms (default: 5000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any delay in ms (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth strategy (default: fixed).
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter factor 0.0–1.0 (default: 0.0).
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            strategy: BackoffStrategy::Fixed,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms.min(self.max_delay_ms),
            BackoffStrategy::Exponential => {
                calculate_backoff_delay(attempt.saturating_sub(1), self.base_delay_ms, self.max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }

    /// Delay before retry `attempt` with jitter drawn from `random` in `[0.0, 1.0)`.
    pub fn jittered_delay_for(&self, attempt: u32, random: f64) -> Duration {
        let base = u64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(apply_jitter(base, self.jitter_factor, random))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff math
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff: `base * 2^exponent`, capped at `max_delay_ms`.
pub fn calculate_backoff_delay(exponent: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << exponent.min(31))
        .min(max_delay_ms)
}

/// Spread `delay_ms` by `±jitter_factor`.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn apply_jitter(delay_ms: u64, jitter_factor: f64, random: f64) -> u64 {
    if jitter_factor <= 0.0 {
        return delay_ms;
    }
    // Maps random [0,1) to [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.min(1.0);
    ((delay_ms as f64) * jitter).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- ReconnectPolicy --

    #[test]
    fn policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.base_delay_ms, 5_000);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert_eq!(policy.strategy, BackoffStrategy::Fixed);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str(r#"{"strategy":"exponential"}"#).unwrap();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = ReconnectPolicy {
            base_delay_ms: 250,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_doubles_then_caps() {
        let policy = ReconnectPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            strategy: BackoffStrategy::Exponential,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(1_000));
    }

    // -- backoff math --

    #[test]
    fn backoff_saturates() {
        assert_eq!(calculate_backoff_delay(100, u64::MAX / 2, u64::MAX), u64::MAX);
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(apply_jitter(1_000, 0.0, 0.9), 1_000);
        assert_eq!(apply_jitter(1_000, 0.2, 0.0), 800);
        assert_eq!(apply_jitter(1_000, 0.2, 0.5), 1_000);
        assert!(apply_jitter(1_000, 0.2, 0.999) <= 1_200);
    }

    #[test]
    fn strategy_parse() {
        assert_eq!(BackoffStrategy::parse("Exponential"), Some(BackoffStrategy::Exponential));
        assert_eq!(BackoffStrategy::parse("linear"), None);
    }
}
