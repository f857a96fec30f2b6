//! Configuration management for Relaycast
//!
//! Configuration lives in a TOML file. Every section is optional and falls
//! back to the defaults below, so a minimal file only needs the values that
//! differ:
//!
//! ```toml
//! [database]
//! path = "~/.local/share/relaycast/relaycast.db"
//!
//! [scheduler]
//! poll_interval = "1m"
//! max_retries = 3
//! base_delay = "1m"
//!
//! [queue]
//! drain_interval = "1s"
//!
//! [destination]
//! endpoint = "https://chat.example.org/api/v1/messages"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const DEFAULT_SECRET_KEY_ENV: &str = "RELAYCAST_SECRET_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/relaycast/relaycast.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between scheduler ticks
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    /// Attempts after which an item is marked failed
    pub max_retries: u32,
    /// First retry delay, doubled for every failed attempt
    #[serde(with = "humantime_duration")]
    pub base_delay: Duration,
    /// Distinct destination credentials processed concurrently within a tick
    pub max_concurrency: usize,
    /// Retry content the destination rejected, same as network failures
    pub retry_rejected: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_concurrency: 1,
            retry_rejected: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Time between drain attempts; one forward is delivered per interval
    #[serde(with = "humantime_duration")]
    pub drain_interval: Duration,
    /// Optional bound on queued forwards; unbounded when absent
    pub max_pending: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(1),
            max_pending: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable holding the master key for sealed credentials
    pub secret_key_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            secret_key_env: DEFAULT_SECRET_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Message endpoint of the destination network
    pub endpoint: Option<String>,
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration, using defaults when no file exists at the
    /// default location
    ///
    /// A path named by `RELAYCAST_CONFIG` must exist.
    pub fn load_or_default() -> Result<Self> {
        let explicit = std::env::var("RELAYCAST_CONFIG").is_ok();
        let config_path = resolve_config_path()?;
        if !explicit && !config_path.exists() {
            tracing::info!(path = %config_path.display(), "no config file, using defaults");
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval.is_zero() {
            return Err(invalid("scheduler.poll_interval", "must be greater than zero"));
        }
        if self.scheduler.max_retries == 0 {
            return Err(invalid("scheduler.max_retries", "must be at least 1"));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(invalid("scheduler.max_concurrency", "must be at least 1"));
        }
        if self.queue.drain_interval.is_zero() {
            return Err(invalid("queue.drain_interval", "must be greater than zero"));
        }
        if self.queue.max_pending == Some(0) {
            return Err(invalid("queue.max_pending", "must be at least 1 when set"));
        }
        if self.credentials.secret_key_env.trim().is_empty() {
            return Err(ConfigError::MissingField("credentials.secret_key_env".to_string()).into());
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::RelaycastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path under the XDG config directory
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("RELAYCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("relaycast").join("config.toml"))
}

/// Resolve the database path, honouring `RELAYCAST_DB_PATH`
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("RELAYCAST_DB_PATH") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    match configured {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).to_string())),
        None => {
            let data_dir = dirs::data_dir()
                .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;
            Ok(data_dir.join("relaycast").join("relaycast.db"))
        }
    }
}

/// Durations written the human way ("90s", "1m", "2h 30m")
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
