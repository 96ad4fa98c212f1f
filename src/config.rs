use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub mod defaults {
    pub const DB_PATH: &str = "forq.db";
    pub const API_ADDR: &str = "localhost:8080";

    pub const MESSAGE_CONTENT_MAX_SIZE_BYTES: usize = 256 * 1024;
    pub const MAX_PROCESS_AFTER_DELAY_MS: i64 = 366 * 24 * 60 * 60 * 1000;
    pub const PROCESS_AFTER_BUFFER_MS: i64 = 10 * 1000;
    pub const MAX_DELIVERY_ATTEMPTS: i64 = 5;
    pub const BACKOFF_DELAYS_MS: [i64; 5] = [1_000, 5_000, 15_000, 30_000, 60_000];
    pub const QUEUE_TTL_MS: i64 = 24 * 60 * 60 * 1000;
    pub const DLQ_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
    pub const POLLING_DURATION_MS: u64 = 30 * 1000;
    pub const MAX_PROCESSING_TIME_MS: i64 = 30 * 1000;

    pub const STALE_SWEEP_INTERVAL_MS: u64 = 60 * 1000;
    pub const FAILED_SWEEP_INTERVAL_MS: u64 = 2 * 60 * 1000;
    pub const EXPIRED_SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;
    pub const DLQ_FAILED_SWEEP_INTERVAL_MS: u64 = 2 * 60 * 1000;
    pub const DLQ_EXPIRED_SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1000;
    pub const OPTIMIZE_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;
    pub const QUEUE_DEPTH_SAMPLE_INTERVAL_MS: u64 = 30 * 1000;

    pub const SERVER_REQUEST_TIMEOUT_BUFFER_MS: u64 = 15 * 1000;
    pub const SERVER_IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

    pub const MIN_AUTH_SECRET_LEN: usize = 32;
}

/// Tunables, loaded once from `FORQ_`-prefixed environment variables and
/// immutable afterwards. Every field falls back to the documented default.
#[derive(Clone, Deserialize, Default)]
pub struct Config {
    pub db_path: Option<String>,
    pub api_addr: Option<String>,

    pub auth_secret: Option<SecretString>,
    pub metrics_enabled: Option<bool>,
    pub metrics_auth_secret: Option<SecretString>,

    pub message_content_max_size_bytes: Option<usize>,
    pub max_process_after_delay_ms: Option<i64>,
    pub process_after_buffer_ms: Option<i64>,
    pub max_delivery_attempts: Option<i64>,
    pub backoff_delays_ms: Option<Vec<i64>>,
    pub queue_ttl_ms: Option<i64>,
    pub dlq_ttl_ms: Option<i64>,
    pub polling_duration_ms: Option<u64>,
    pub max_processing_time_ms: Option<i64>,

    pub stale_sweep_interval_ms: Option<u64>,
    pub failed_sweep_interval_ms: Option<u64>,
    pub expired_sweep_interval_ms: Option<u64>,
    pub dlq_failed_sweep_interval_ms: Option<u64>,
    pub dlq_expired_sweep_interval_ms: Option<u64>,
    pub optimize_enabled: Option<bool>,
    pub optimize_interval_ms: Option<u64>,
    pub queue_depth_sample_interval_ms: Option<u64>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("FORQ_").from_env::<Self>()?)
    }

    /// Startup-time sanity checks. Failures here are fatal by design.
    pub fn validate(&self) -> eyre::Result<()> {
        let Some(secret) = self.auth_secret.as_ref() else {
            eyre::bail!("FORQ_AUTH_SECRET is required");
        };
        if secret.expose_secret().len() < defaults::MIN_AUTH_SECRET_LEN {
            eyre::bail!(
                "FORQ_AUTH_SECRET must be at least {} characters",
                defaults::MIN_AUTH_SECRET_LEN
            );
        }

        if self.metrics_enabled() && self.metrics_auth_secret.is_none() {
            eyre::bail!("FORQ_METRICS_AUTH_SECRET is required when metrics are enabled");
        }

        if self.max_delivery_attempts() < 1 {
            eyre::bail!("FORQ_MAX_DELIVERY_ATTEMPTS must be at least 1");
        }
        if self.backoff_delays_ms().is_empty() {
            eyre::bail!("FORQ_BACKOFF_DELAYS_MS must not be empty");
        }

        Ok(())
    }

    pub fn db_path(&self) -> &str {
        self.db_path.as_deref().unwrap_or(defaults::DB_PATH)
    }

    pub fn api_addr(&self) -> &str {
        self.api_addr.as_deref().unwrap_or(defaults::API_ADDR)
    }

    pub fn auth_secret(&self) -> &SecretString {
        self.auth_secret
            .as_ref()
            .expect("auth secret validated at startup")
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled.unwrap_or(false)
    }

    pub fn metrics_auth_secret(&self) -> Option<&SecretString> {
        self.metrics_auth_secret.as_ref()
    }

    pub fn message_content_max_size_bytes(&self) -> usize {
        self.message_content_max_size_bytes
            .unwrap_or(defaults::MESSAGE_CONTENT_MAX_SIZE_BYTES)
    }

    pub fn max_process_after_delay_ms(&self) -> i64 {
        self.max_process_after_delay_ms
            .unwrap_or(defaults::MAX_PROCESS_AFTER_DELAY_MS)
    }

    pub fn process_after_buffer_ms(&self) -> i64 {
        self.process_after_buffer_ms
            .unwrap_or(defaults::PROCESS_AFTER_BUFFER_MS)
    }

    pub fn max_delivery_attempts(&self) -> i64 {
        self.max_delivery_attempts
            .unwrap_or(defaults::MAX_DELIVERY_ATTEMPTS)
    }

    pub fn backoff_delays_ms(&self) -> &[i64] {
        match &self.backoff_delays_ms {
            Some(delays) => delays.as_slice(),
            None => &defaults::BACKOFF_DELAYS_MS,
        }
    }

    pub fn queue_ttl_ms(&self) -> i64 {
        self.queue_ttl_ms.unwrap_or(defaults::QUEUE_TTL_MS)
    }

    pub fn dlq_ttl_ms(&self) -> i64 {
        self.dlq_ttl_ms.unwrap_or(defaults::DLQ_TTL_MS)
    }

    pub fn polling_duration(&self) -> Duration {
        Duration::from_millis(
            self.polling_duration_ms
                .unwrap_or(defaults::POLLING_DURATION_MS),
        )
    }

    pub fn max_processing_time_ms(&self) -> i64 {
        self.max_processing_time_ms
            .unwrap_or(defaults::MAX_PROCESSING_TIME_MS)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.stale_sweep_interval_ms
                .unwrap_or(defaults::STALE_SWEEP_INTERVAL_MS),
        )
    }

    pub fn failed_sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.failed_sweep_interval_ms
                .unwrap_or(defaults::FAILED_SWEEP_INTERVAL_MS),
        )
    }

    pub fn expired_sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.expired_sweep_interval_ms
                .unwrap_or(defaults::EXPIRED_SWEEP_INTERVAL_MS),
        )
    }

    pub fn dlq_failed_sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.dlq_failed_sweep_interval_ms
                .unwrap_or(defaults::DLQ_FAILED_SWEEP_INTERVAL_MS),
        )
    }

    pub fn dlq_expired_sweep_interval(&self) -> Duration {
        Duration::from_millis(
            self.dlq_expired_sweep_interval_ms
                .unwrap_or(defaults::DLQ_EXPIRED_SWEEP_INTERVAL_MS),
        )
    }

    pub fn optimize_enabled(&self) -> bool {
        self.optimize_enabled.unwrap_or(true)
    }

    pub fn optimize_interval(&self) -> Duration {
        Duration::from_millis(
            self.optimize_interval_ms
                .unwrap_or(defaults::OPTIMIZE_INTERVAL_MS),
        )
    }

    pub fn queue_depth_sample_interval(&self) -> Duration {
        Duration::from_millis(
            self.queue_depth_sample_interval_ms
                .unwrap_or(defaults::QUEUE_DEPTH_SAMPLE_INTERVAL_MS),
        )
    }

    /// A fetch holds its response open for the whole polling window, so the
    /// client-facing request timeout gets the window plus headroom.
    pub fn server_request_timeout(&self) -> Duration {
        self.polling_duration()
            + Duration::from_millis(defaults::SERVER_REQUEST_TIMEOUT_BUFFER_MS)
    }

    pub fn server_idle_timeout(&self) -> Duration {
        Duration::from_millis(defaults::SERVER_IDLE_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(secret: &str) -> Config {
        Config {
            auth_secret: Some(SecretString::from(secret.to_owned())),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.message_content_max_size_bytes(), 262_144);
        assert_eq!(config.max_delivery_attempts(), 5);
        assert_eq!(
            config.backoff_delays_ms(),
            &[1_000, 5_000, 15_000, 30_000, 60_000]
        );
        assert_eq!(config.queue_ttl_ms(), 24 * 60 * 60 * 1000);
        assert_eq!(config.dlq_ttl_ms(), 7 * 24 * 60 * 60 * 1000);
        assert_eq!(config.max_processing_time_ms(), 30_000);
        assert_eq!(config.polling_duration(), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_missing_or_short_secret() {
        assert!(Config::default().validate().is_err());
        assert!(with_secret("too-short").validate().is_err());
        assert!(with_secret("0123456789abcdef0123456789abcdef")
            .validate()
            .is_ok());
    }

    #[test]
    fn server_request_timeout_covers_the_polling_window() {
        let config = Config {
            polling_duration_ms: Some(200),
            ..Config::default()
        };
        assert_eq!(
            config.server_request_timeout(),
            Duration::from_millis(15_200)
        );

        let config = Config::default();
        assert!(config.server_request_timeout() > config.polling_duration());
    }

    #[test]
    fn validate_requires_metrics_secret_when_enabled() {
        let mut config = with_secret("0123456789abcdef0123456789abcdef");
        config.metrics_enabled = Some(true);
        assert!(config.validate().is_err());

        config.metrics_auth_secret = Some(SecretString::from("metrics-secret".to_owned()));
        assert!(config.validate().is_ok());
    }
}
