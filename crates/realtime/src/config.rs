//! Realtime engine configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; malformed values are rejected instead of silently replaced.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket gateway bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health and metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default seconds between client heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 10;

/// Default grace in seconds after a missed heartbeat.
pub const DEFAULT_HEARTBEAT_WAIT_SECONDS: u64 = 10;

/// Default per-session outbound queue capacity, in frames.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default bound on an actor's `stopped` hook, in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECONDS: u64 = 5;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rt";

/// Realtime engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket gateway bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Expected client heartbeat period in seconds.
    pub heartbeat_interval_seconds: u64,

    /// Extra seconds a connection may stay silent past the interval.
    pub heartbeat_wait_seconds: u64,

    /// Outbound frames buffered per session before frames are dropped.
    pub outbound_buffer: usize,

    /// Bound on shutdown hooks and session replacement, in seconds.
    pub stop_timeout_seconds: u64,

    /// JSON seed for the in-memory store. `None` starts empty.
    pub seed_file: Option<PathBuf>,

    /// Unique identifier for this instance.
    pub instance_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("REALTIME_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("REALTIME_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let heartbeat_interval_seconds = parse_positive(
            vars,
            "REALTIME_HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        )?;
        let heartbeat_wait_seconds = parse_positive(
            vars,
            "REALTIME_HEARTBEAT_WAIT_SECONDS",
            DEFAULT_HEARTBEAT_WAIT_SECONDS,
        )?;
        let outbound_buffer =
            parse_positive(vars, "REALTIME_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        let stop_timeout_seconds = parse_positive(
            vars,
            "REALTIME_STOP_TIMEOUT_SECONDS",
            DEFAULT_STOP_TIMEOUT_SECONDS,
        )?;

        let seed_file = vars
            .get("REALTIME_SEED_FILE")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let instance_id = vars.get("REALTIME_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            heartbeat_interval_seconds,
            heartbeat_wait_seconds,
            outbound_buffer,
            stop_timeout_seconds,
            seed_file,
            instance_id,
        })
    }

    /// How long a connection may stay silent before it is closed.
    #[must_use]
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds + self.heartbeat_wait_seconds)
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        Ok(_) => Err(ConfigError::InvalidValue(format!("{name} must be greater than zero"))),
        Err(_) => Err(ConfigError::InvalidValue(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}
