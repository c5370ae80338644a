use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;

use crate::config::ExchangeConfig;

pub const AMQP_HOST: &str = "AMQP_HOST";
pub const AMQP_PORT: &str = "AMQP_PORT";
pub const AMQP_USERNAME: &str = "AMQP_USERNAME";
pub const AMQP_PASSWORD: &str = "AMQP_PASSWORD";
pub const AMQP_VPN: &str = "AMQP_VPN";
pub const AMQP_SSL: &str = "AMQP_SSL";
pub const AMQP_CONNECTION_ATTEMPTS: &str = "AMQP_CONNECTION_ATTEMPTS";
pub const AMQP_CONNECTION_TIMEOUT_MS: &str = "AMQP_CONNECTION_TIMEOUT_MS";
pub const AMQP_QUEUE_NAME: &str = "AMQP_QUEUE_NAME";
pub const AMQP_TOPIC_NAME: &str = "AMQP_TOPIC_NAME";

/// Values supplied through the process environment (or a `.env` file).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vpn: Option<String>,
    pub use_tls: Option<bool>,
    pub max_connection_attempts: Option<u32>,
    pub connection_timeout_ms: Option<u64>,
    pub queue_name: Option<String>,
    pub topic_name: Option<String>,
}

impl EnvOverrides {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(EnvOverrides {
            host: lookup(AMQP_HOST),
            port: parse_var(&lookup, AMQP_PORT)?,
            username: lookup(AMQP_USERNAME),
            password: lookup(AMQP_PASSWORD),
            vpn: lookup(AMQP_VPN),
            use_tls: match lookup(AMQP_SSL) {
                Some(val) => Some(parse_flag(&val).context(format!("Invalid {}", AMQP_SSL))?),
                None => None,
            },
            max_connection_attempts: parse_var(&lookup, AMQP_CONNECTION_ATTEMPTS)?,
            connection_timeout_ms: parse_var(&lookup, AMQP_CONNECTION_TIMEOUT_MS)?,
            queue_name: lookup(AMQP_QUEUE_NAME),
            topic_name: lookup(AMQP_TOPIC_NAME),
        })
    }

    pub fn apply(&self, config: &mut ExchangeConfig) {
        let connection = &mut config.connection;
        if let Some(host) = &self.host {
            connection.host = host.clone();
        }
        if let Some(port) = self.port {
            connection.port = port;
        }
        if let Some(username) = &self.username {
            connection.username = username.clone();
        }
        if let Some(password) = &self.password {
            connection.password = password.clone();
        }
        if let Some(vpn) = &self.vpn {
            connection.vpn = vpn.clone();
        }
        if let Some(use_tls) = self.use_tls {
            connection.use_tls = use_tls;
        }
        if let Some(attempts) = self.max_connection_attempts {
            connection.max_connection_attempts = attempts;
        }
        if let Some(timeout) = self.connection_timeout_ms {
            connection.connection_timeout_ms = timeout;
        }
        if let Some(queue_name) = &self.queue_name {
            config.destinations.queue_name = queue_name.clone();
        }
        if let Some(topic_name) = &self.topic_name {
            config.destinations.topic_name = topic_name.clone();
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(val) => Ok(Some(
            val.trim()
                .parse()
                .context(format!("Invalid value '{}' for {}", val, key))?,
        )),
        None => Ok(None),
    }
}

/// Accepts the boolean spellings used by the tutorial scripts.
pub fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(anyhow!("expected true or false, got '{}'", other)),
    }
}
