use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Cereal`](crate::Cereal) lock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CerealConfig {
    /// Name of the system this server coordinates, used in logs and errors.
    pub system: String,
    /// Wait applied to requests that pass [`Timeout::Default`](cereal_core::Timeout::Default).
    pub default_wait_timeout: Duration,
    /// Lease length applied to requests that ask for a zero duration.
    pub default_lease_duration: Duration,
    /// How long a resource must sit idle before `optimize` reclaims it.
    pub staleness_threshold: Duration,
    /// Enables two-party deadlock detection for indefinite waits.
    pub detect_deadlocks: bool,
    /// Worker threads driving lease expiry and queue hand-off.
    pub timer_threads: usize,
}

impl Default for CerealConfig {
    fn default() -> Self {
        Self {
            system: "default".to_string(),
            default_wait_timeout: Duration::from_millis(500),
            default_lease_duration: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(25),
            detect_deadlocks: false,
            timer_threads: 1,
        }
    }
}

impl CerealConfig {
    /// Creates a new configuration builder with default settings.
    pub fn builder() -> CerealConfigBuilder {
        CerealConfigBuilder::default()
    }
}

/// Builder for `CerealConfig`.
#[derive(Debug, Default)]
pub struct CerealConfigBuilder {
    system: Option<String>,
    default_wait_timeout: Option<Duration>,
    default_lease_duration: Option<Duration>,
    staleness_threshold: Option<Duration>,
    detect_deadlocks: Option<bool>,
    timer_threads: Option<usize>,
}

impl CerealConfigBuilder {
    /// Sets the system identifier (default: "default").
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the default wait timeout (default: 500ms).
    pub fn default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = Some(timeout);
        self
    }

    /// Sets the default lease duration (default: 30s).
    pub fn default_lease_duration(mut self, duration: Duration) -> Self {
        self.default_lease_duration = Some(duration);
        self
    }

    /// Sets the idle period after which resources are reclaimed (default: 25s).
    pub fn staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = Some(threshold);
        self
    }

    /// Turns deadlock detection on or off (default: off).
    pub fn detect_deadlocks(mut self, enabled: bool) -> Self {
        self.detect_deadlocks = Some(enabled);
        self
    }

    /// Sets the number of timer worker threads (default: 1, minimum: 1).
    pub fn timer_threads(mut self, threads: usize) -> Self {
        self.timer_threads = Some(threads);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CerealConfig {
        let defaults = CerealConfig::default();
        CerealConfig {
            system: self.system.unwrap_or(defaults.system),
            default_wait_timeout: self
                .default_wait_timeout
                .unwrap_or(defaults.default_wait_timeout),
            default_lease_duration: self
                .default_lease_duration
                .unwrap_or(defaults.default_lease_duration),
            staleness_threshold: self
                .staleness_threshold
                .unwrap_or(defaults.staleness_threshold),
            detect_deadlocks: self.detect_deadlocks.unwrap_or(defaults.detect_deadlocks),
            timer_threads: self.timer_threads.unwrap_or(defaults.timer_threads).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = CerealConfig::builder()
            .system("orders")
            .default_wait_timeout(Duration::from_secs(2))
            .detect_deadlocks(true)
            .timer_threads(0)
            .build();

        assert_eq!(config.system, "orders");
        assert_eq!(config.default_wait_timeout, Duration::from_secs(2));
        assert!(config.detect_deadlocks);
        assert_eq!(config.timer_threads, 1);
        assert_eq!(config.staleness_threshold, Duration::from_secs(25));
    }

    #[test]
    fn test_partial_deserialize() {
        let config: CerealConfig =
            serde_json::from_str(r#"{ "system": "jobs", "detect_deadlocks": true }"#).unwrap();

        assert_eq!(config.system, "jobs");
        assert!(config.detect_deadlocks);
        assert_eq!(config.default_wait_timeout, Duration::from_millis(500));
    }
}
