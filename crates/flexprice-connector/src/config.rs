// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Connector configuration, loaded from environment variables.
//!
//! Every tuning knob carries a validated default; the only mandatory
//! settings are the API key and a dead-letter target. The retry and batch
//! bounds are not optional; a connector without an attempt limit or a delay
//! cap would retry forever.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_HOST: &str = "https://api.cloud.flexprice.io";
const DEFAULT_BATCH_MAX_EVENTS: usize = 100;
const DEFAULT_BATCH_MAX_AGE_MS: u64 = 5_000;
const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 100;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;

/// Where batches that exhausted normal delivery are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterTarget {
    /// POST dead-letter records to a secondary HTTP endpoint.
    Http { url: String },
    /// Append NDJSON records to a local spill file.
    File { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Base URL of the ingestion API.
    pub api_host: String,
    pub api_key: String,
    /// Events per batch before a count-triggered seal.
    pub batch_max_events: usize,
    /// Age of the open batch (since its first event) before a time-triggered seal.
    pub batch_max_age: Duration,
    /// Batches allowed between "sealed" and "resolved" at once.
    pub max_in_flight: usize,
    /// Delivery attempts per batch, including the first.
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Bound on a single delivery attempt.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight batches before abandoning them.
    pub drain_timeout: Duration,
    pub dead_letter: DeadLetterTarget,
    pub https_proxy: Option<String>,
}

impl ConnectorConfig {
    pub fn from_env() -> anyhow::Result<ConnectorConfig> {
        let api_key = env::var("FLEXPRICE_API_KEY")
            .map_err(|_| anyhow::anyhow!("FLEXPRICE_API_KEY environment variable is not set"))?;
        let api_host =
            env::var("FLEXPRICE_API_HOST").unwrap_or_else(|_| DEFAULT_API_HOST.to_string());

        let dead_letter = match (
            env::var("FLEXPRICE_DEAD_LETTER_URL").ok(),
            env::var("FLEXPRICE_DEAD_LETTER_PATH").ok(),
        ) {
            (Some(url), None) => DeadLetterTarget::Http { url },
            (None, Some(path)) => DeadLetterTarget::File {
                path: PathBuf::from(path),
            },
            (Some(_), Some(_)) => {
                return Err(anyhow::anyhow!(
                    "FLEXPRICE_DEAD_LETTER_URL and FLEXPRICE_DEAD_LETTER_PATH are both set; configure exactly one"
                ))
            }
            (None, None) => {
                return Err(anyhow::anyhow!(
                    "no dead-letter target: set FLEXPRICE_DEAD_LETTER_URL or FLEXPRICE_DEAD_LETTER_PATH"
                ))
            }
        };

        let config = ConnectorConfig {
            api_host,
            api_key,
            batch_max_events: env_usize("FLEXPRICE_BATCH_MAX_EVENTS", DEFAULT_BATCH_MAX_EVENTS),
            batch_max_age: env_duration_ms("FLEXPRICE_BATCH_MAX_AGE_MS", DEFAULT_BATCH_MAX_AGE_MS),
            max_in_flight: env_usize("FLEXPRICE_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT),
            retry_max_attempts: env_u32("FLEXPRICE_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
            retry_base_delay: env_duration_ms("FLEXPRICE_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS),
            retry_max_delay: env_duration_ms(
                "FLEXPRICE_RETRY_MAX_DELAY_MS",
                DEFAULT_RETRY_MAX_DELAY_MS,
            ),
            request_timeout: env_duration_ms(
                "FLEXPRICE_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            ),
            drain_timeout: env_duration_ms("FLEXPRICE_DRAIN_TIMEOUT_MS", DEFAULT_DRAIN_TIMEOUT_MS),
            dead_letter,
            https_proxy: env::var("FLEXPRICE_HTTPS_PROXY")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("API key must not be empty"));
        }
        if self.api_host.trim().is_empty() {
            return Err(anyhow::anyhow!("API host must not be empty"));
        }
        if self.batch_max_events == 0 {
            return Err(anyhow::anyhow!("batch_max_events must be at least 1"));
        }
        if self.batch_max_age.is_zero() {
            return Err(anyhow::anyhow!("batch_max_age must be non-zero"));
        }
        if self.max_in_flight == 0 {
            return Err(anyhow::anyhow!("max_in_flight must be at least 1"));
        }
        if self.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("retry_max_attempts must be at least 1"));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(anyhow::anyhow!(
                "retry_base_delay must not exceed retry_max_delay"
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow::anyhow!("request_timeout must be non-zero"));
        }
        if let DeadLetterTarget::Http { url } = &self.dead_letter {
            if url.trim().is_empty() {
                return Err(anyhow::anyhow!("dead-letter URL must not be empty"));
            }
        }
        Ok(())
    }

    /// Full URL of the bulk-events endpoint.
    pub(crate) fn bulk_events_url(&self) -> String {
        format!("{}/v1/events/bulk", self.api_host.trim_end_matches('/'))
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        env::var(name)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(default_ms),
    )
}


#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::env;

    use super::*;

    const ENV_VARS: &[&str] = &[
        "FLEXPRICE_API_KEY",
        "FLEXPRICE_API_HOST",
        "FLEXPRICE_BATCH_MAX_EVENTS",
        "FLEXPRICE_BATCH_MAX_AGE_MS",
        "FLEXPRICE_MAX_IN_FLIGHT",
        "FLEXPRICE_RETRY_MAX_ATTEMPTS",
        "FLEXPRICE_RETRY_BASE_MS",
        "FLEXPRICE_RETRY_MAX_DELAY_MS",
        "FLEXPRICE_REQUEST_TIMEOUT_MS",
        "FLEXPRICE_DRAIN_TIMEOUT_MS",
        "FLEXPRICE_DEAD_LETTER_URL",
        "FLEXPRICE_DEAD_LETTER_PATH",
        "FLEXPRICE_HTTPS_PROXY",
        "HTTPS_PROXY",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_error_if_no_api_key_env_var() {
        clear_env();
        let config = ConnectorConfig::from_env();
        assert!(config.is_err());
        assert_eq!(
            config.unwrap_err().to_string(),
            "FLEXPRICE_API_KEY environment variable is not set"
        );
    }

    #[test]
    #[serial]
    fn test_error_if_no_dead_letter_target() {
        clear_env();
        env::set_var("FLEXPRICE_API_KEY", "_not_a_real_key_");
        let config = ConnectorConfig::from_env();
        assert!(config.is_err());
        assert!(config
            .unwrap_err()
            .to_string()
            .starts_with("no dead-letter target"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_error_if_both_dead_letter_targets() {
        clear_env();
        env::set_var("FLEXPRICE_API_KEY", "_not_a_real_key_");
        env::set_var("FLEXPRICE_DEAD_LETTER_URL", "http://127.0.0.1:9999/dl");
        env::set_var("FLEXPRICE_DEAD_LETTER_PATH", "/tmp/dl.ndjson");
        let config = ConnectorConfig::from_env();
        assert!(config.is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        env::set_var("FLEXPRICE_API_KEY", "_not_a_real_key_");
        env::set_var("FLEXPRICE_DEAD_LETTER_PATH", "/tmp/dl.ndjson");

        let config = ConnectorConfig::from_env().unwrap();
        assert_eq!(config.api_host, DEFAULT_API_HOST);
        assert_eq!(config.batch_max_events, 100);
        assert_eq!(config.batch_max_age, Duration::from_secs(5));
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(100));
        assert_eq!(config.retry_max_delay, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(
            config.dead_letter,
            DeadLetterTarget::File {
                path: PathBuf::from("/tmp/dl.ndjson")
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("FLEXPRICE_API_KEY", "_not_a_real_key_");
        env::set_var("FLEXPRICE_API_HOST", "http://127.0.0.1:3333");
        env::set_var("FLEXPRICE_BATCH_MAX_EVENTS", "250");
        env::set_var("FLEXPRICE_BATCH_MAX_AGE_MS", "750");
        env::set_var("FLEXPRICE_MAX_IN_FLIGHT", "8");
        env::set_var("FLEXPRICE_RETRY_MAX_ATTEMPTS", "5");
        env::set_var("FLEXPRICE_DEAD_LETTER_URL", "http://127.0.0.1:9999/dl");

        let config = ConnectorConfig::from_env().unwrap();
        assert_eq!(config.api_host, "http://127.0.0.1:3333");
        assert_eq!(config.batch_max_events, 250);
        assert_eq!(config.batch_max_age, Duration::from_millis(750));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(
            config.dead_letter,
            DeadLetterTarget::Http {
                url: "http://127.0.0.1:9999/dl".to_string()
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparsable_numeric_falls_back_to_default() {
        clear_env();
        env::set_var("FLEXPRICE_API_KEY", "_not_a_real_key_");
        env::set_var("FLEXPRICE_DEAD_LETTER_PATH", "/tmp/dl.ndjson");
        env::set_var("FLEXPRICE_BATCH_MAX_EVENTS", "not_an_int");

        let config = ConnectorConfig::from_env().unwrap();
        assert_eq!(config.batch_max_events, DEFAULT_BATCH_MAX_EVENTS);
        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = test_support::test_config("http://localhost");
        config.batch_max_events = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = test_support::test_config("http://localhost");
        config.retry_max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_base_above_cap() {
        let mut config = test_support::test_config("http://localhost");
        config.retry_base_delay = Duration::from_secs(10);
        config.retry_max_delay = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_in_flight() {
        let mut config = test_support::test_config("http://localhost");
        config.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_test_config() {
        assert!(test_support::test_config("http://localhost").validate().is_ok());
    }
}
