//! Ingest Configuration Settings
//!
//! Configuration types for the ticker ingester, loaded from environment
//! variables. Unset or empty variables take their defaults; numeric
//! variables that fail to parse fall back to their defaults as well.

use std::time::Duration;

use crate::application::services::{PipelineSettings, ReconnectConfig};
use crate::domain::buffer::DEFAULT_MAX_BUFFERED;
use crate::infrastructure::binance::DEFAULT_FEED_URL;

/// Store user and password.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(user: String, password: String) -> Self {
        Self { user, password }
    }

    /// Get the user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Analytical store (ClickHouse HTTP interface) settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// HTTP endpoint, e.g. `http://localhost:8123`.
    pub host: String,
    /// Store credentials.
    pub credentials: Credentials,
    /// Database name.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Per-request timeout.
    pub write_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:8123".to_string(),
            credentials: Credentials::new("default".to_string(), String::new()),
            database: "default".to_string(),
            table: "market_ticks".to_string(),
            write_timeout: Duration::from_secs(20),
        }
    }
}

/// Batching and flush settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Buffer length that triggers an immediate flush.
    pub batch_max: usize,
    /// Timer flush period.
    pub flush_interval: Duration,
    /// Overflow bound.
    pub max_buffered: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_max: 1000,
            flush_interval: Duration::from_millis(2000),
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }
}

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffMode {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Doubling delay with jitter, capped.
    Exponential,
}

impl BackoffMode {
    /// Parse mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "exponential" => Self::Exponential,
            _ => Self::Fixed,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

/// Feed reconnection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Delay before a reconnection attempt (initial delay when exponential).
    pub delay: Duration,
    /// Delay strategy.
    pub backoff: BackoffMode,
    /// Delay cap when exponential.
    pub delay_max: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            backoff: BackoffMode::Fixed,
            delay_max: Duration::from_secs(30),
        }
    }
}

impl ReconnectSettings {
    /// Reconnect policy configuration for these settings.
    #[must_use]
    pub const fn to_reconnect_config(&self) -> ReconnectConfig {
        match self.backoff {
            BackoffMode::Fixed => ReconnectConfig::fixed(self.delay),
            BackoffMode::Exponential => ReconnectConfig::exponential(self.delay, self.delay_max),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingester configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Store settings.
    pub store: StoreSettings,
    /// Feed WebSocket URL.
    pub feed_url: String,
    /// Batching settings.
    pub batching: BatchSettings,
    /// Reconnect settings.
    pub reconnect: ReconnectSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            batching: BatchSettings::default(),
            reconnect: ReconnectSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let store = StoreSettings {
            host: env.string("CLICKHOUSE_HOST", &defaults.store.host),
            credentials: Credentials::new(
                env.string("CLICKHOUSE_USER", defaults.store.credentials.user()),
                env.string("CLICKHOUSE_PASS", defaults.store.credentials.password()),
            ),
            database: env.string("CLICKHOUSE_DB", &defaults.store.database),
            table: env.string("CLICKHOUSE_TABLE", &defaults.store.table),
            write_timeout: env.duration_secs(
                "INGEST_WRITE_TIMEOUT_SECS",
                defaults.store.write_timeout,
            ),
        };

        let batching = BatchSettings {
            batch_max: env.parse("INGEST_BATCH_MAX", defaults.batching.batch_max),
            flush_interval: env.duration_millis(
                "INGEST_FLUSH_INTERVAL_MS",
                defaults.batching.flush_interval,
            ),
            max_buffered: env.parse("INGEST_MAX_BUFFERED", defaults.batching.max_buffered),
        };

        let reconnect = ReconnectSettings {
            delay: env.duration_millis("INGEST_RECONNECT_DELAY_MS", defaults.reconnect.delay),
            backoff: env
                .get("INGEST_RECONNECT_BACKOFF")
                .map(|s| BackoffMode::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            delay_max: env.duration_secs(
                "INGEST_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect.delay_max,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("INGEST_HEALTH_PORT", defaults.server.health_port),
        };

        let config = Self {
            store,
            feed_url: env.string("FEED_URL", &defaults.feed_url),
            batching,
            reconnect,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("INGEST_BATCH_MAX", self.batching.batch_max == 0),
            ("INGEST_FLUSH_INTERVAL_MS", self.batching.flush_interval.is_zero()),
            ("INGEST_MAX_BUFFERED", self.batching.max_buffered == 0),
            ("INGEST_WRITE_TIMEOUT_SECS", self.store.write_timeout.is_zero()),
            ("INGEST_RECONNECT_DELAY_MS", self.reconnect.delay.is_zero()),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::NotPositive((*key).to_string()));
        }

        require_scheme("CLICKHOUSE_HOST", &self.store.host, &["http://", "https://"])?;
        require_scheme("FEED_URL", &self.feed_url, &["ws://", "wss://"])?;

        if self.batching.max_buffered < self.batching.batch_max {
            return Err(ConfigError::OverflowBelowBatch {
                max_buffered: self.batching.max_buffered,
                batch_max: self.batching.batch_max,
            });
        }

        if self.reconnect.backoff == BackoffMode::Exponential
            && self.reconnect.delay_max < self.reconnect.delay
        {
            return Err(ConfigError::ReconnectCapBelowDelay {
                delay: self.reconnect.delay,
                delay_max: self.reconnect.delay_max,
            });
        }

        Ok(())
    }

    /// Pipeline tuning derived from this configuration.
    #[must_use]
    pub const fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            batch_max: self.batching.batch_max,
            flush_interval: self.batching.flush_interval,
            max_buffered: self.batching.max_buffered,
            reconnect: self.reconnect.to_reconnect_config(),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A size, interval or timeout is zero.
    #[error("environment variable {0} must be greater than zero")]
    NotPositive(String),
    /// A URL has the wrong scheme.
    #[error("environment variable {key} must start with {expected}, got {value:?}")]
    InvalidScheme {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Accepted schemes.
        expected: String,
    },
    /// The overflow bound cannot hold one full batch.
    #[error("INGEST_MAX_BUFFERED ({max_buffered}) must be at least INGEST_BATCH_MAX ({batch_max})")]
    OverflowBelowBatch {
        /// Configured overflow bound.
        max_buffered: usize,
        /// Configured batch size.
        batch_max: usize,
    },
    /// The exponential backoff cap is below the initial delay.
    #[error(
        "INGEST_RECONNECT_DELAY_MAX_SECS ({delay_max:?}) must be at least INGEST_RECONNECT_DELAY_MS ({delay:?})"
    )]
    ReconnectCapBelowDelay {
        /// Initial reconnect delay.
        delay: Duration,
        /// Configured cap.
        delay_max: Duration,
    },
}

fn require_scheme(key: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let lower = value.to_lowercase();
    if schemes.iter().any(|scheme| lower.starts_with(scheme)) {
        return Ok(());
    }
    Err(ConfigError::InvalidScheme {
        key: key.to_string(),
        value: value.to_string(),
        expected: schemes.join(" or "),
    })
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
