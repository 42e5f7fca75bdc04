//! Gateway configuration.
//!
//! All broker settings, including credentials, are injected here via a
//! config file or environment variables. Nothing in this workspace carries
//! a built-in broker address or password.

use crate::config_err;
use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_HOST: &str = "SKYHOOK_MQTT_HOST";
    pub const MQTT_PORT: &str = "SKYHOOK_MQTT_PORT";
    pub const MQTT_USERNAME: &str = "SKYHOOK_MQTT_USERNAME";
    pub const MQTT_PASSWORD: &str = "SKYHOOK_MQTT_PASSWORD";
    pub const MQTT_CLIENT_ID: &str = "SKYHOOK_MQTT_CLIENT_ID";
    pub const DATA_DIR: &str = "SKYHOOK_DATA_DIR";
    pub const LOG_JSON: &str = "SKYHOOK_LOG_JSON";
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker address.
    pub host: String,

    /// Broker port (default 1883 for non-TLS, 8883 for TLS).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID. A random one is generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Clean session flag.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Use TLS/SSL.
    #[serde(default)]
    pub tls: bool,

    /// Opaque vendor settings (license keys, workspace metadata) handed
    /// to the transport implementation unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_params: Option<serde_json::Value>,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

impl BrokerConfig {
    /// Create a new broker configuration.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            tls: false,
            module_params: None,
        }
    }

    /// Build a broker configuration from `SKYHOOK_MQTT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var(env_vars::MQTT_HOST)
            .map_err(|_| config_err!("{} is not set", env_vars::MQTT_HOST))?;
        let mut config = Self::new(host);

        if let Ok(port) = std::env::var(env_vars::MQTT_PORT) {
            config.port = port
                .parse()
                .map_err(|_| config_err!("invalid {}: {}", env_vars::MQTT_PORT, port))?;
        }
        if let Ok(username) = std::env::var(env_vars::MQTT_USERNAME) {
            config.username = Some(username);
        }
        if let Ok(password) = std::env::var(env_vars::MQTT_PASSWORD) {
            config.password = Some(password);
        }
        if let Ok(client_id) = std::env::var(env_vars::MQTT_CLIENT_ID) {
            config.client_id = Some(client_id);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        if tls && self.port == 1883 {
            self.port = 8883;
        }
        self
    }

    /// Get the full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("broker host is empty"));
        }
        if self.port == 0 {
            return Err(Error::config("broker port must be non-zero"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::config(
                "username and password must be provided together",
            ));
        }
        Ok(())
    }
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// First retry delay in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single retry delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive failures tolerated before the session gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time
    /// and capped at `max_delay_ms`. Jitter is applied by the caller.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Broker connection settings.
    pub broker: BrokerConfig,

    /// Reconnect backoff policy.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Default reply window for commands, in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Per-publish transport timeout, in milliseconds.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    /// Known device identity. Discovered from topology traffic when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<DeviceIdentity>,

    /// Command topic suffixes to probe, in preference order.
    #[serde(default = "default_dialect_candidates")]
    pub dialect_candidates: Vec<String>,
}

fn default_command_timeout() -> u64 {
    10_000
}

fn default_publish_timeout() -> u64 {
    5_000
}

fn default_dialect_candidates() -> Vec<String> {
    vec!["services".to_string(), "commands".to_string()]
}

impl GatewayConfig {
    /// Create a configuration with defaults around the given broker.
    pub fn new(broker: BrokerConfig) -> Self {
        Self {
            broker,
            reconnect: ReconnectPolicy::default(),
            command_timeout_ms: default_command_timeout(),
            publish_timeout_ms: default_publish_timeout(),
            identity: None,
            dialect_candidates: default_dialect_candidates(),
        }
    }

    /// Build a configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(BrokerConfig::from_env()?))
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| config_err!("cannot read {}: {}", path.as_ref().display(), e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| config_err!("cannot parse {}: {}", path.as_ref().display(), e))?;
        Ok(config)
    }

    /// Set the device identity.
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        if self.command_timeout_ms == 0 {
            return Err(Error::config("command timeout must be non-zero"));
        }
        if self.dialect_candidates.is_empty() {
            return Err(Error::config("at least one dialect candidate is required"));
        }
        Ok(())
    }
}
