// ABOUTME: Construction-time configuration for the session coordinator.
// ABOUTME: Built in code with `with_*` setters or deserialized from JSON.

use std::time::Duration;

use serde::Deserialize;

use crate::error::CoordinatorError;

const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;

fn default_reap_interval_ms() -> u64 {
    DEFAULT_REAP_INTERVAL_MS
}

/// Whole milliseconds in `duration`, never less than one.
fn millis_at_least_one(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// Configuration for a [`SessionCoordinator`](crate::SessionCoordinator).
///
/// The default configuration never reclaims a lock from its holder: a holder
/// that never releases starves its session's queue until the session is cleared.
/// Setting `hold_timeout_ms` lets the reaper force-release stale holders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Maximum time a holder may keep a session locked before the reaper
    /// force-releases it. `None` disables reaping.
    #[serde(default)]
    pub hold_timeout_ms: Option<u64>,

    /// How often the background reaper sweeps for expired holders.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hold_timeout_ms: None,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl CoordinatorConfig {
    /// Create the default configuration (no hold timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, CoordinatorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Force-release holders that keep a session locked longer than `timeout`.
    pub fn with_hold_timeout(mut self, timeout: Duration) -> Self {
        self.hold_timeout_ms = Some(millis_at_least_one(timeout));
        self
    }

    /// Set the sweep period of the background reaper.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = millis_at_least_one(interval);
        self
    }

    /// The configured hold timeout, never shorter than one millisecond.
    pub fn hold_timeout(&self) -> Option<Duration> {
        self.hold_timeout_ms.map(|ms| Duration::from_millis(ms.max(1)))
    }

    /// The reaper's sweep period, never shorter than one millisecond.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_hold_timeout() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.hold_timeout(), None);
        assert_eq!(config.reap_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_builder_setters() {
        let config = CoordinatorConfig::new()
            .with_hold_timeout(Duration::from_secs(30))
            .with_reap_interval(Duration::from_millis(250));
        assert_eq!(config.hold_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.reap_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CoordinatorConfig::from_json(r#"{"hold_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.hold_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.reap_interval_ms, DEFAULT_REAP_INTERVAL_MS);

        let config = CoordinatorConfig::from_json("{}").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let err = CoordinatorConfig::from_json(r#"{"max_queue": 3}"#).unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[test]
    fn test_sub_millisecond_hold_timeout_is_clamped() {
        let config = CoordinatorConfig::new().with_hold_timeout(Duration::from_micros(10));
        assert_eq!(config.hold_timeout_ms, Some(1));
        assert_eq!(config.hold_timeout(), Some(Duration::from_millis(1)));

        let config = CoordinatorConfig::from_json(r#"{"hold_timeout_ms": 0}"#).unwrap();
        assert_eq!(config.hold_timeout(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_zero_reap_interval_is_clamped() {
        let config = CoordinatorConfig::new().with_reap_interval(Duration::ZERO);
        assert_eq!(config.reap_interval(), Duration::from_millis(1));
    }
}
