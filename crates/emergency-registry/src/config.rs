//! Configuration types for the registry service.
//!
//! All configuration is loaded from environment variables. The service needs
//! to know how to reach NATS and `PostgreSQL`, which `JetStream` stream and
//! durable consumer to bind, and how patiently to retry store failures.

use std::str::FromStr;
use std::time::Duration;

use emergency_core::{ConsumerConfig, RetryPolicy};

use crate::error::RegistryError;

/// Default `JetStream` stream holding emergency events.
const DEFAULT_STREAM: &str = "EMERGENCIES";

/// Default subject the producer publishes emergency events on.
const DEFAULT_SUBJECT: &str = "registro_emergencias";

/// Default durable consumer name.
const DEFAULT_CONSUMER: &str = "registro";

/// Default prefix of the status change subjects.
const DEFAULT_STATUS_SUBJECT_PREFIX: &str = "emergencies.status";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected `text` or `json`, got `{other}`")),
        }
    }
}

/// Complete registry configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// NATS server URL (e.g. `nats://localhost:4222`).
    pub nats_url: String,
    /// `PostgreSQL` connection URL.
    pub database_url: String,
    /// `JetStream` stream name.
    pub stream: String,
    /// Subject bound to the stream.
    pub subject: String,
    /// Durable consumer name.
    pub consumer_name: String,
    /// Prefix for `<prefix>.<emergency_id>` status change subjects.
    pub status_subject_prefix: String,
    /// Maximum connections in the `PostgreSQL` pool.
    pub db_max_connections: u32,
    /// Consumer loop tuning, including the retry policy.
    pub consumer: ConsumerConfig,
    /// Log output format.
    pub log_format: LogFormat,
}

impl RegistryConfig {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `NATS_URL` -- NATS server connection string
    /// - `DATABASE_URL` -- `PostgreSQL` connection string
    ///
    /// Optional variables:
    /// - `REGISTRY_STREAM` -- `JetStream` stream (default `EMERGENCIES`)
    /// - `REGISTRY_SUBJECT` -- event subject (default `registro_emergencias`)
    /// - `REGISTRY_CONSUMER` -- durable consumer (default `registro`)
    /// - `STATUS_SUBJECT_PREFIX` -- status feed prefix (default `emergencies.status`)
    /// - `MAX_ATTEMPTS` -- deliveries before dead-lettering (default 5)
    /// - `RETRY_BASE_DELAY_MS` -- first backoff delay (default 500)
    /// - `RETRY_MAX_DELAY_MS` -- backoff ceiling (default 30000)
    /// - `RETRY_JITTER` -- randomize backoff (default `true`)
    /// - `STORE_TIMEOUT_MS` -- deadline per store call (default 5000)
    /// - `RECEIVE_TIMEOUT_MS` -- idle wait before re-checking shutdown (default 1000)
    /// - `MAX_IN_FLIGHT` -- concurrently handled messages (default 8)
    /// - `DB_MAX_CONNECTIONS` -- `PostgreSQL` pool size (default 10)
    /// - `LOG_FORMAT` -- `text` or `json` (default `text`)
    pub fn from_env() -> Result<Self, RegistryError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RegistryError> {
        let nats_url = required(&lookup, "NATS_URL")?;
        let database_url = required(&lookup, "DATABASE_URL")?;

        let stream = text_or(&lookup, "REGISTRY_STREAM", DEFAULT_STREAM);
        let subject = text_or(&lookup, "REGISTRY_SUBJECT", DEFAULT_SUBJECT);
        let consumer_name = text_or(&lookup, "REGISTRY_CONSUMER", DEFAULT_CONSUMER);
        let status_subject_prefix =
            text_or(&lookup, "STATUS_SUBJECT_PREFIX", DEFAULT_STATUS_SUBJECT_PREFIX);

        let defaults = ConsumerConfig::default();
        let max_attempts: u32 = parsed_or(&lookup, "MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(RegistryError::Config(String::from(
                "invalid MAX_ATTEMPTS: must be at least 1",
            )));
        }
        let base_delay = millis_or(&lookup, "RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?;
        let max_delay = millis_or(&lookup, "RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?;
        if max_delay < base_delay {
            return Err(RegistryError::Config(format!(
                "invalid RETRY_MAX_DELAY_MS: {}ms is below RETRY_BASE_DELAY_MS {}ms",
                max_delay.as_millis(),
                base_delay.as_millis()
            )));
        }
        let jitter: bool = parsed_or(&lookup, "RETRY_JITTER", defaults.retry.jitter)?;

        let max_in_flight: usize = parsed_or(&lookup, "MAX_IN_FLIGHT", defaults.max_in_flight)?;
        if max_in_flight == 0 {
            return Err(RegistryError::Config(String::from(
                "invalid MAX_IN_FLIGHT: must be at least 1",
            )));
        }

        let receive_timeout =
            nonzero_millis_or(&lookup, "RECEIVE_TIMEOUT_MS", defaults.receive_timeout)?;
        let store_timeout =
            nonzero_millis_or(&lookup, "STORE_TIMEOUT_MS", defaults.store_timeout)?;

        let consumer = ConsumerConfig {
            retry: RetryPolicy::default()
                .with_max_attempts(max_attempts)
                .with_delays(base_delay, max_delay)
                .with_jitter(jitter),
            max_in_flight,
            receive_timeout,
            store_timeout,
        };

        Ok(Self {
            nats_url,
            database_url,
            stream,
            subject,
            consumer_name,
            status_subject_prefix,
            db_max_connections: parsed_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            consumer,
            log_format: parsed_or(&lookup, "LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

/// Read a required, non-blank variable.
fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, RegistryError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::Config(format!("missing required env var {name}")))
}

fn text_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parsed_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, RegistryError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RegistryError::Config(format!("invalid {name}: {e}"))),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, RegistryError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parsed_or(lookup, name, default_ms).map(Duration::from_millis)
}

fn nonzero_millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, RegistryError> {
    let value = millis_or(lookup, name, default)?;
    if value.is_zero() {
        return Err(RegistryError::Config(format!("invalid {name}: must be at least 1")));
    }
    Ok(value)
}
