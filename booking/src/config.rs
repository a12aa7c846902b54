//! Configuration for the booking client.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("{key} has an invalid value {value:?}: expected {expected}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// What was expected
        expected: &'static str,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote trip API
    pub api: ApiConfig,
    /// Durable selection storage
    pub storage: StorageConfig,
    /// Booking session behaviour
    pub session: SessionConfig,
}

/// Remote trip API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://localhost:8000/api`
    pub base_url: String,
    /// Bearer credential for authenticated endpoints
    pub token: Option<String>,
    /// Per-request timeout; none by default
    pub request_timeout: Option<Duration>,
}

/// Durable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding persisted selections
    pub path: PathBuf,
    /// How often to check the document for writes made by other processes
    pub poll_interval: Duration,
}

/// Booking session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a session operation waits for its network outcome
    pub wait_timeout: Duration,
    /// `RUST_LOG`-style filter for the binary
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000/api".to_string(),
                token: None,
                request_timeout: None,
            },
            storage: StorageConfig {
                path: PathBuf::from(".tripdesk/selection.json"),
                poll_interval: Duration::from_millis(200),
            },
            session: SessionConfig {
                wait_timeout: Duration::from_secs(30),
                log_filter: "info,tripdesk_booking=debug".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable is set but not a
    /// non-negative integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api: ApiConfig {
                base_url: non_empty("TRIPDESK_API_URL").unwrap_or(defaults.api.base_url),
                token: non_empty("TRIPDESK_API_TOKEN"),
                request_timeout: seconds(
                    "TRIPDESK_REQUEST_TIMEOUT_SECS",
                    non_empty("TRIPDESK_REQUEST_TIMEOUT_SECS"),
                )?,
            },
            storage: StorageConfig {
                path: non_empty("TRIPDESK_STORAGE_PATH")
                    .map_or(defaults.storage.path, PathBuf::from),
                poll_interval: millis(
                    "TRIPDESK_STORAGE_POLL_MS",
                    non_empty("TRIPDESK_STORAGE_POLL_MS"),
                )?
                .filter(|interval| !interval.is_zero())
                .unwrap_or(defaults.storage.poll_interval),
            },
            session: SessionConfig {
                wait_timeout: seconds(
                    "TRIPDESK_WAIT_TIMEOUT_SECS",
                    non_empty("TRIPDESK_WAIT_TIMEOUT_SECS"),
                )?
                .unwrap_or(defaults.session.wait_timeout),
                log_filter: non_empty("RUST_LOG").unwrap_or(defaults.session.log_filter),
            },
        })
    }
}

fn seconds(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    duration(key, value, Duration::from_secs, "whole seconds")
}

fn millis(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    duration(key, value, Duration::from_millis, "whole milliseconds")
}

fn duration(
    key: &'static str,
    value: Option<String>,
    unit: fn(u64) -> Duration,
    expected: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(unit)
                .map_err(|_| ConfigError::Invalid {
                    key,
                    value: raw,
                    expected,
                })
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.api.token, None);
        assert_eq!(config.api.request_timeout, None);
        assert_eq!(config.storage.path, PathBuf::from(".tripdesk/selection.json"));
        assert_eq!(config.storage.poll_interval, Duration::from_millis(200));
        assert_eq!(config.session.wait_timeout, Duration::from_secs(30));
    }

    #[test]
    fn variables_override_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("TRIPDESK_API_URL", "https://api.tripdesk.test"),
            ("TRIPDESK_API_TOKEN", "secret"),
            ("TRIPDESK_REQUEST_TIMEOUT_SECS", "10"),
            ("TRIPDESK_WAIT_TIMEOUT_SECS", " 5 "),
            ("TRIPDESK_STORAGE_PATH", "/tmp/tripdesk.json"),
            ("TRIPDESK_STORAGE_POLL_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(config.api.base_url, "https://api.tripdesk.test");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.api.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.session.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.storage.path, PathBuf::from("/tmp/tripdesk.json"));
        assert_eq!(config.storage.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = Config::from_lookup(lookup(&[("TRIPDESK_WAIT_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "TRIPDESK_WAIT_TIMEOUT_SECS",
                value: "soon".into(),
                expected: "whole seconds",
            }
        );
    }

    #[test]
    fn zero_poll_interval_falls_back_to_default() {
        let config = Config::from_lookup(lookup(&[("TRIPDESK_STORAGE_POLL_MS", "0")])).unwrap();
        assert_eq!(config.storage.poll_interval, Duration::from_millis(200));

        let err = Config::from_lookup(lookup(&[("TRIPDESK_STORAGE_POLL_MS", "fast")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "TRIPDESK_STORAGE_POLL_MS", expected: "whole milliseconds", .. }
        ));
    }

    #[test]
    fn blank_token_counts_as_unset() {
        let config = Config::from_lookup(lookup(&[("TRIPDESK_API_TOKEN", "  ")])).unwrap();
        assert_eq!(config.api.token, None);
    }
}
