//! Configuration management for the market service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike a missing variable, a present but unparsable one is an error: a
//! typo in `MAX_IN_FLIGHT` should stop the service, not quietly run it with
//! the default.

use market_runtime::AcquisitionPolicy;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid value {value:?} for {variable}: {reason}")]
pub struct ConfigError {
    /// Environment variable name
    pub variable: &'static str,
    /// Raw value found
    pub value: String,
    /// Why it was rejected
    pub reason: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// RedPanda/Kafka configuration
    pub redpanda: RedpandaConfig,
    /// Farmers market API configuration
    pub market: MarketConfig,
    /// Acquisition and intake tuning
    pub acquisition: AcquisitionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// RedPanda/Kafka configuration
#[derive(Debug, Clone, Serialize)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group shared by all worker instances
    pub consumer_group: String,
    /// Topic purchase requests arrive on
    pub requests_queue: String,
    /// Topic for discarded requests, if any
    pub dead_letter_queue: Option<String>,
}

/// Farmers market API configuration
#[derive(Debug, Clone, Serialize)]
pub struct MarketConfig {
    /// Purchase endpoint
    pub api_url: String,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

/// Acquisition and intake tuning
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionConfig {
    /// Wait after an empty or failed poll, in milliseconds
    pub retry_timeout_ms: u64,
    /// Maximum polls per request (unbounded if unset)
    pub max_attempts: Option<usize>,
    /// Maximum time per request in milliseconds (unbounded if unset)
    pub max_duration_ms: Option<u64>,
    /// Requests processed concurrently
    pub max_in_flight: usize,
    /// Requeue unparsable requests instead of discarding them
    pub requeue_malformed: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        Ok(Self {
            server: ServerConfig {
                host: vars.string("HOST", "0.0.0.0"),
                port: vars.parse("PORT", 3004)?,
                shutdown_timeout: vars.parse("SHUTDOWN_TIMEOUT_SECS", 30)?,
            },
            redpanda: RedpandaConfig {
                brokers: vars.string("REDPANDA_BROKERS", "localhost:9092"),
                consumer_group: vars.string("CONSUMER_GROUP", "market-service"),
                requests_queue: vars.string("MARKET_REQUESTS_QUEUE", "market_requests"),
                dead_letter_queue: vars.get("DEAD_LETTER_QUEUE"),
            },
            market: MarketConfig {
                api_url: vars.string("MARKET_API_URL", market_client::DEFAULT_API_URL),
                timeout_ms: vars.positive("MARKET_API_TIMEOUT_MS", 10_000)?,
            },
            acquisition: AcquisitionConfig {
                retry_timeout_ms: vars.positive("RETRY_TIMEOUT_MS", 5000)?,
                max_attempts: vars.optional_positive("MAX_ATTEMPTS")?,
                max_duration_ms: vars.optional_positive("MAX_DURATION_MS")?,
                max_in_flight: vars.positive("MAX_IN_FLIGHT", 16)?,
                requeue_malformed: vars.parse("REQUEUE_MALFORMED", false)?,
            },
        })
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Polling policy for each request.
    #[must_use]
    pub fn policy(&self) -> AcquisitionPolicy {
        let acquisition = &self.acquisition;
        let mut builder = AcquisitionPolicy::builder()
            .retry_interval(Duration::from_millis(acquisition.retry_timeout_ms));
        if let Some(max_attempts) = acquisition.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        if let Some(max_duration_ms) = acquisition.max_duration_ms {
            builder = builder.max_duration(Duration::from_millis(max_duration_ms));
        }
        builder.build()
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank value.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError {
                    variable: key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn optional_positive<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + Default + PartialEq + Display,
        T::Err: Display,
    {
        match self.optional::<T>(key)? {
            Some(value) if value == T::default() => Err(ConfigError {
                variable: key,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            other => Ok(other),
        }
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq + Display,
        T::Err: Display,
    {
        Ok(self.optional_positive(key)?.unwrap_or(default))
    }
}
