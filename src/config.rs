//! Tracker configuration
//!
//! Configuration is plain data with defaults matching the reader's client
//! settings. It can be loaded from environment variables; absence of a
//! webhook URL is valid and simply disables delivery.

use std::time::Duration;

use crate::catalog::TrafficLightThresholds;
use crate::emitter::RetryPolicy;
use crate::error::TrackError;
use crate::session::DEFAULT_PARTICIPANT_PARAM;

/// Default number of retries after the initial delivery attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Default per-request timeout (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Complete tracker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Webhook receiving event batches. `None` disables delivery.
    pub webhook_url: Option<String>,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `retry_delay * 2^n`.
    pub retry_delay: Duration,
    /// Upper bound on a single webhook request.
    pub request_timeout: Duration,
    /// Launch query parameter carrying the participant identifier.
    pub participant_param: String,
    /// Score thresholds used when an article has no explicit status.
    pub thresholds: TrafficLightThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            participant_param: DEFAULT_PARTICIPANT_PARAM.to_string(),
            thresholds: TrafficLightThresholds::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from the process environment.
    ///
    /// Recognized variables:
    /// - `NEWSLIGHT_WEBHOOK_URL` -- delivery endpoint (unset or blank disables delivery)
    /// - `NEWSLIGHT_MAX_RETRIES` -- retries after the first attempt (default 3)
    /// - `NEWSLIGHT_RETRY_DELAY_MS` -- base backoff delay (default 1000)
    /// - `NEWSLIGHT_REQUEST_TIMEOUT_MS` -- request timeout (default 10000)
    /// - `NEWSLIGHT_PARTICIPANT_PARAM` -- launch query parameter (default `pid`)
    /// - `NEWSLIGHT_GREEN_MAX` / `NEWSLIGHT_YELLOW_MAX` -- score thresholds (default 33 / 66)
    pub fn from_env() -> Result<Self, TrackError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TrackError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let webhook_url = lookup("NEWSLIGHT_WEBHOOK_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let max_retries = parse_var(&lookup, "NEWSLIGHT_MAX_RETRIES", defaults.max_retries)?;
        let retry_delay_ms =
            parse_var(&lookup, "NEWSLIGHT_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS)?;
        let request_timeout_ms =
            parse_var(&lookup, "NEWSLIGHT_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;

        let participant_param = lookup("NEWSLIGHT_PARTICIPANT_PARAM")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.participant_param);

        let thresholds = TrafficLightThresholds::new(
            parse_var(&lookup, "NEWSLIGHT_GREEN_MAX", defaults.thresholds.green_max)?,
            parse_var(&lookup, "NEWSLIGHT_YELLOW_MAX", defaults.thresholds.yellow_max)?,
        )?;

        Ok(Self {
            webhook_url,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            participant_param,
            thresholds,
        })
    }

    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    /// Whether a delivery endpoint is configured
    pub fn delivery_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, TrackError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| TrackError::Config(format!("invalid {key}: {e}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_disable_delivery() {
        let config = TrackerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert!(!config.delivery_enabled());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.participant_param, "pid");
    }

    #[test]
    fn test_blank_webhook_counts_as_absent() {
        let config =
            TrackerConfig::from_lookup(lookup_from(&[("NEWSLIGHT_WEBHOOK_URL", "   ")])).unwrap();
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = TrackerConfig::from_lookup(lookup_from(&[
            ("NEWSLIGHT_WEBHOOK_URL", " https://hooks.example.com/exec "),
            ("NEWSLIGHT_MAX_RETRIES", "5"),
            ("NEWSLIGHT_RETRY_DELAY_MS", "250"),
            ("NEWSLIGHT_PARTICIPANT_PARAM", "participant"),
            ("NEWSLIGHT_GREEN_MAX", "20"),
            ("NEWSLIGHT_YELLOW_MAX", "50"),
        ]))
        .unwrap();

        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example.com/exec")
        );
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(config.participant_param, "participant");
        assert_eq!(config.thresholds.green_max, 20);
        assert_eq!(config.thresholds.yellow_max, 50);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let result =
            TrackerConfig::from_lookup(lookup_from(&[("NEWSLIGHT_MAX_RETRIES", "three")]));
        assert!(matches!(
            result,
            Err(TrackError::Config(msg)) if msg.contains("NEWSLIGHT_MAX_RETRIES")
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let result = TrackerConfig::from_lookup(lookup_from(&[
            ("NEWSLIGHT_GREEN_MAX", "70"),
            ("NEWSLIGHT_YELLOW_MAX", "40"),
        ]));
        assert!(matches!(result, Err(TrackError::Config(_))));
    }
}
