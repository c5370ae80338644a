// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::exchange::errors::ExchangeError;

pub const CONFIG_FILE_NAME: &str = "amqp-exchange.json";
pub const DEFAULT_VPN: &str = "default";

// Configuration structures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub destinations: DestinationSettings,
}

/// Broker connection parameters. Treat as immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    #[serde(default = "default_vpn")]
    pub vpn: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_attempts")]
    pub max_connection_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_topic_name")]
    pub topic_name: String,
}

// Default values
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5672 }
fn default_credential() -> String { "default".to_string() }
fn default_vpn() -> String { DEFAULT_VPN.to_string() }
fn default_timeout() -> u64 { 10_000 }
fn default_attempts() -> u32 { 3 }
fn default_queue_name() -> String { "Q/tutorial".to_string() }
fn default_topic_name() -> String { "T/tutorial".to_string() }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_credential(),
            password: default_credential(),
            vpn: default_vpn(),
            use_tls: false,
            connection_timeout_ms: default_timeout(),
            max_connection_attempts: default_attempts(),
        }
    }
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            topic_name: default_topic_name(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> std::result::Result<(), ExchangeError> {
        if self.host.trim().is_empty() {
            return Err(ExchangeError::InvalidConfig("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ExchangeError::InvalidConfig(
                "port must be in the range 1-65535".into(),
            ));
        }
        if self.max_connection_attempts < 1 {
            return Err(ExchangeError::InvalidConfig(
                "connection attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn broker_url(&self) -> String {
        let scheme = if self.use_tls { "amqps" } else { "amqp" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// The VPN to announce as the AMQP open hostname; the default VPN is implicit.
    pub fn virtual_host(&self) -> Option<&str> {
        let vpn = self.vpn.trim();
        if vpn.is_empty() || vpn == DEFAULT_VPN {
            None
        } else {
            Some(vpn)
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

// Configuration loading and management functions
pub fn find_config_file() -> Option<PathBuf> {
    let locations = [
        ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
        ("Config directory", Path::new("config").join(CONFIG_FILE_NAME)),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path.clone());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Some(home_config);
        }
    }

    None
}

/// Loads the config file at `path`, or the first one found by [`find_config_file`].
/// Without any file the built-in defaults are returned.
pub fn load_config(path: Option<&Path>) -> Result<ExchangeConfig> {
    let config_path = match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(anyhow!("Config file not found at {}", explicit.display()));
            }
            explicit.to_path_buf()
        }
        None => match find_config_file() {
            Some(found) => found,
            None => {
                debug!("No config file found, using built-in defaults");
                return Ok(ExchangeConfig::default());
            }
        },
    };

    let config_content = fs::read_to_string(&config_path)
        .context(format!("Failed to read config file at {}", config_path.display()))?;

    let config: ExchangeConfig = serde_json::from_str(&config_content)
        .context("Configuration file contains invalid JSON or mistyped fields")?;

    config
        .connection
        .validate()
        .map_err(|e| anyhow!("Configuration error in {}: {}", config_path.display(), e))?;

    Ok(config)
}

pub fn create_default_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(anyhow!("Refusing to overwrite existing file {}", path.display()));
    }

    let json = serde_json::to_string_pretty(&ExchangeConfig::default())
        .context("Failed to serialize default configuration")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory at {}", parent.display()))?;
        }
    }

    fs::write(path, json)
        .context(format!("Failed to write configuration to {}", path.display()))?;

    info!("Created default configuration file at: {}", path.display());
    Ok(())
}
