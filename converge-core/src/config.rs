//! Engine configuration
//!
//! Durations are written in seconds when deserialized from a manifest.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Backoff used while waiting for asynchronous remote operations
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay before the second poll; never zero
    #[serde(rename = "initial_interval_secs", deserialize_with = "positive_secs")]
    pub initial_interval: Duration,
    /// Upper bound for the delay between polls
    #[serde(rename = "max_interval_secs", deserialize_with = "secs")]
    pub max_interval: Duration,
    /// Growth factor between polls, within `MULTIPLIER_RANGE`
    #[serde(deserialize_with = "multiplier")]
    pub multiplier: f64,
}

/// Accepted values for `PollConfig::multiplier`
pub const MULTIPLIER_RANGE: std::ops::RangeInclusive<f64> = 1.0..=10.0;

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl PollConfig {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay that follows `current`, never above `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let factor = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(self.max_interval);
        next.max(self.initial_interval).min(self.max_interval)
    }
}

/// Configuration for reconciliation passes
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub poll: PollConfig,
    /// Describe the resource before planning when prior state is given
    pub refresh: bool,
    /// Deadline for one pass when the request sets none
    #[serde(rename = "timeout_secs", deserialize_with = "secs")]
    pub default_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            refresh: true,
            default_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn positive_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let duration = secs(deserializer)?;
    if duration.is_zero() {
        return Err(serde::de::Error::custom("interval must be greater than zero"));
    }
    Ok(duration)
}

fn multiplier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !MULTIPLIER_RANGE.contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "multiplier {} is outside {}..={}",
            value,
            MULTIPLIER_RANGE.start(),
            MULTIPLIER_RANGE.end()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = PollConfig::default();
        let mut interval = config.initial_interval;
        let mut seen = vec![interval.as_secs()];
        for _ in 0..6 {
            interval = config.next_interval(interval);
            seen.push(interval.as_secs());
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn deserialize_partial_config() {
        let config: ReconcilerConfig = serde_json::from_str(
            r#"{"timeout_secs": 90, "poll": {"initial_interval_secs": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.default_timeout, Duration::from_secs(90));
        assert_eq!(config.poll.initial_interval, Duration::from_millis(500));
        assert_eq!(config.poll.max_interval, Duration::from_secs(30));
        assert!(config.refresh);
    }

    #[test]
    fn negative_durations_are_rejected() {
        let result: Result<PollConfig, _> =
            serde_json::from_str(r#"{"max_interval_secs": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_multiplier_is_rejected() {
        for document in [
            r#"{"multiplier": 1e30}"#,
            r#"{"multiplier": 0.5}"#,
            r#"{"multiplier": -2}"#,
        ] {
            let result: Result<PollConfig, _> = serde_json::from_str(document);
            let err = result.unwrap_err().to_string();
            assert!(err.contains("multiplier"), "{}: {}", document, err);
        }

        let config: PollConfig = serde_json::from_str(r#"{"multiplier": 1.5}"#).unwrap();
        assert_eq!(config.multiplier, 1.5);
    }

    #[test]
    fn zero_initial_interval_is_rejected() {
        let result: Result<PollConfig, _> =
            serde_json::from_str(r#"{"initial_interval_secs": 0}"#);
        assert!(result.unwrap_err().to_string().contains("greater than zero"));
    }

    #[test]
    fn extreme_multiplier_saturates_at_the_cap() {
        let config = PollConfig::default().with_multiplier(1e30);
        assert_eq!(
            config.next_interval(Duration::from_secs(1)),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.next_interval(Duration::from_secs(30)),
            Duration::from_secs(30)
        );

        let config = PollConfig::default().with_multiplier(f64::NAN);
        assert_eq!(
            config.next_interval(Duration::from_secs(4)),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn zero_interval_grows_from_the_initial_interval() {
        let config = PollConfig::default();
        assert_eq!(config.next_interval(Duration::ZERO), Duration::from_secs(1));
    }
}
