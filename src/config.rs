//! Client configuration loaded from environment variables or built in code.
//!
//! Follows 12-factor style: every setting can come from an environment
//! variable (or a `.env` file via `dotenvy`), and every setting has a
//! builder method for programmatic use.

use std::time::Duration;

use crate::domain::ReconnectPolicy;
use crate::error::ClientError;

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint both sockets connect to.
    pub url: String,

    /// Reconnect backoff shared by both sockets.
    pub reconnect: ReconnectPolicy,

    /// Maximum transaction ids remembered for dedup (0 = unbounded).
    pub dedup_capacity: usize,

    /// Capacity of the status broadcast channel.
    pub status_bus_capacity: usize,

    /// Handshake timeout for each socket.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Creates a configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            dedup_capacity: 100_000,
            status_bus_capacity: 1_024,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    /// Unset or unparseable optional variables fall back to defaults.
    ///
    /// | Variable                  | Default   |
    /// |---------------------------|-----------|
    /// | `STREAM_URL`              | required  |
    /// | `RECONNECT_BASE_DELAY_MS` | 2500      |
    /// | `RECONNECT_MAX_DELAY_MS`  | 4500      |
    /// | `RECONNECT_JITTER`        | 0.5       |
    /// | `RECONNECT_MAX_ATTEMPTS`  | unbounded |
    /// | `DEDUP_CAPACITY`          | 100000    |
    /// | `STATUS_BUS_CAPACITY`     | 1024      |
    /// | `CONNECT_TIMEOUT_MS`      | 10000     |
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `STREAM_URL` is missing or the
    /// resulting configuration fails [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();

        let url = std::env::var("STREAM_URL")
            .map_err(|_| ClientError::Config("STREAM_URL is not set".to_string()))?;

        let defaults = Self::new(url);
        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(parse_env(
                "RECONNECT_BASE_DELAY_MS",
                duration_ms(defaults.reconnect.base_delay),
            )),
            max_delay: Duration::from_millis(parse_env(
                "RECONNECT_MAX_DELAY_MS",
                duration_ms(defaults.reconnect.max_delay),
            )),
            jitter_factor: parse_env("RECONNECT_JITTER", defaults.reconnect.jitter_factor),
            max_attempts: std::env::var("RECONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let config = Self {
            reconnect,
            dedup_capacity: parse_env("DEDUP_CAPACITY", defaults.dedup_capacity),
            status_bus_capacity: parse_env("STATUS_BUS_CAPACITY", defaults.status_bus_capacity),
            connect_timeout: Duration::from_millis(parse_env(
                "CONNECT_TIMEOUT_MS",
                duration_ms(defaults.connect_timeout),
            )),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the maximum number of reconnect attempts (`None` = unbounded).
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Sets the dedup cache capacity (0 = unbounded).
    #[must_use]
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    /// Sets the status channel capacity.
    #[must_use]
    pub fn status_bus_capacity(mut self, capacity: usize) -> Self {
        self.status_bus_capacity = capacity;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the URL is empty, the reconnect
    /// policy is invalid, or a capacity/timeout is zero where it must not be.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.trim().is_empty() {
            return Err(ClientError::Config("url cannot be empty".to_string()));
        }
        self.reconnect.validate()?;
        if self.status_bus_capacity == 0 {
            return Err(ClientError::Config(
                "status bus capacity must be > 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClientError::Config(
                "connect timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
