//! Timing and naming knobs for a sync client.

use std::time::Duration;

use crate::sync::presence::Thresholds;

/// Default topic prefix; the room code is appended.
pub const DEFAULT_TOPIC_PREFIX: &str = "thousand-app/room";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a new client waits for a retained snapshot before it
    /// creates the room itself.
    pub bootstrap_grace: Duration,
    pub heartbeat_interval: Duration,
    /// How often the host re-evaluates liveness.
    pub presence_check_interval: Duration,
    pub away_after: Duration,
    pub disconnect_after: Duration,
    pub topic_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bootstrap_grace: Duration::from_millis(1_500),
            heartbeat_interval: Duration::from_millis(5_000),
            presence_check_interval: Duration::from_millis(5_000),
            away_after: Duration::from_millis(20_000),
            disconnect_after: Duration::from_millis(90_000),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `THOUSAND_*` environment variables.
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bootstrap_grace: read_ms("THOUSAND_BOOTSTRAP_GRACE_MS", defaults.bootstrap_grace),
            heartbeat_interval: read_ms("THOUSAND_HEARTBEAT_MS", defaults.heartbeat_interval),
            presence_check_interval: read_ms(
                "THOUSAND_PRESENCE_CHECK_MS",
                defaults.presence_check_interval,
            ),
            away_after: read_ms("THOUSAND_AWAY_AFTER_MS", defaults.away_after),
            disconnect_after: read_ms("THOUSAND_DISCONNECT_AFTER_MS", defaults.disconnect_after),
            topic_prefix: std::env::var("THOUSAND_TOPIC_PREFIX")
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .unwrap_or(defaults.topic_prefix),
        }
    }

    pub fn with_bootstrap_grace(mut self, grace: Duration) -> Self {
        self.bootstrap_grace = grace;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_presence_check_interval(mut self, interval: Duration) -> Self {
        self.presence_check_interval = interval;
        self
    }

    pub fn with_thresholds(mut self, away_after: Duration, disconnect_after: Duration) -> Self {
        self.away_after = away_after;
        self.disconnect_after = disconnect_after;
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Liveness thresholds in the reducer's clock type.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.away_after, self.disconnect_after)
    }
}

fn read_ms(key: &str, fallback: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.bootstrap_grace, Duration::from_millis(1_500));
        assert_eq!(config.away_after, Duration::from_secs(20));
        assert_eq!(config.disconnect_after, Duration::from_secs(90));
        assert_eq!(config.topic_prefix, "thousand-app/room");
    }

    #[test]
    fn test_builders() {
        let config = SyncConfig::default()
            .with_bootstrap_grace(Duration::from_millis(10))
            .with_thresholds(Duration::from_millis(100), Duration::from_millis(300))
            .with_topic_prefix("test/room");

        assert_eq!(config.bootstrap_grace, Duration::from_millis(10));
        assert_eq!(config.topic_prefix, "test/room");
        assert_eq!(
            config.thresholds(),
            Thresholds::new(Duration::from_millis(100), Duration::from_millis(300))
        );
    }

    #[test]
    fn test_read_ms_falls_back() {
        let fallback = Duration::from_millis(42);
        assert_eq!(read_ms("THOUSAND_TEST_UNSET_VARIABLE", fallback), fallback);
    }
}
