//! Configuration management for multihome.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::ApiConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsConfig;
use crate::source::ListenerConfig;
use crate::util::{DiscoveryConfig, ProbeConfig};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation loop timing.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Interface discovery filters.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Connectivity probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Management API.
    #[serde(default)]
    pub api: ApiConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listener.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.listener.poll_timeout.is_zero() {
            return Err(Error::InvalidConfig("poll_timeout must be non-zero".into()));
        }
        if self.probe.timeout.is_zero() {
            return Err(Error::InvalidConfig("probe timeout must be non-zero".into()));
        }
        if self.probe.timeout >= self.listener.poll_timeout {
            return Err(Error::InvalidConfig(
                "probe timeout must be shorter than poll_timeout".into(),
            ));
        }
        if self.probe.stun_servers.is_empty() && self.probe.dns_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or DNS probe server is required".into(),
            ));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "multihome", "multihome").map_or_else(
            || PathBuf::from("multihome.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Load from `path`, or from the default path when it exists, or defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            discovery: DiscoveryConfig {
                interfaces: vec!["eth0".into(), "wlan0".into(), "wwan0".into()],
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "debug".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
