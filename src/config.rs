//! Gateway configuration
//!
//! A [`GatewayConfig`] is built either in code or from a TOML file. Host and
//! port fall back to the platform defaults for the selected protocol, and the
//! secret key may come from an environment variable so it never has to live in
//! the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MQTT_HOST: &str = "mqtt.datonis.io";
pub const DEFAULT_API_HOST: &str = "api.datonis.io";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Wire protocol used to reach the platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Mqtt,
    Mqtts,
}

impl Protocol {
    /// True for the acknowledged MQTT channel
    pub fn is_mqtt(self) -> bool {
        matches!(self, Protocol::Mqtt | Protocol::Mqtts)
    }

    /// True when the connection is TLS-protected
    pub fn is_secure(self) -> bool {
        matches!(self, Protocol::Https | Protocol::Mqtts)
    }

    pub fn default_host(self) -> &'static str {
        if self.is_mqtt() {
            DEFAULT_MQTT_HOST
        } else {
            DEFAULT_API_HOST
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Protocol::Mqtt => Some(DEFAULT_MQTT_PORT),
            Protocol::Mqtts => Some(DEFAULT_MQTTS_PORT),
            Protocol::Http | Protocol::Https => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Mqtt => "mqtt",
            Protocol::Mqtts => "mqtts",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "mqtt" => Ok(Protocol::Mqtt),
            "mqtts" => Ok(Protocol::Mqtts),
            other => Err(ConfigError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Acknowledgement wait settings for the MQTT channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckSettings {
    /// Number of wait ticks before a send is declared timed out
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Length of one wait tick in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Poll interval while waiting for the connection to settle
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,
}

fn default_max_retries() -> u32 {
    10
}

fn default_tick_ms() -> u64 {
    10_000
}

fn default_connect_poll_ms() -> u64 {
    3_000
}

impl Default for AckSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            tick_ms: default_tick_ms(),
            connect_poll_ms: default_connect_poll_ms(),
        }
    }
}

impl AckSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn connect_poll(&self) -> Duration {
        Duration::from_millis(self.connect_poll_ms)
    }

    /// Upper bound on how long one acknowledged send may wait
    pub fn max_wait(&self) -> Duration {
        self.tick() * self.max_retries
    }
}

/// Inbound instruction pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstructionSettings {
    /// Capacity of the instruction queue; newer instructions are dropped when full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for InstructionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Gateway configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Platform access key (gateway identity)
    pub access_key: String,
    /// Shared HMAC secret, never transmitted
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    /// Environment variable holding the secret key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_env: Option<String>,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// CA certificate (PEM) for `mqtts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub ack: AckSettings,
    #[serde(default)]
    pub instructions: InstructionSettings,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("No secret key configured (set secret_key or secret_key_env)")]
    MissingSecret,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            secret_key_env: None,
            protocol,
            host: None,
            port: None,
            cert_path: None,
            ack: AckSettings::default(),
            instructions: InstructionSettings::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    pub fn with_ack_settings(mut self, ack: AckSettings) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_instruction_settings(mut self, instructions: InstructionSettings) -> Self {
        self.instructions = instructions;
        self
    }

    /// Load configuration from a TOML file, resolving `secret_key_env`
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: GatewayConfig = toml::from_str(&content)?;

        config.resolve_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Resolve environment variables in configuration
    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if !self.secret_key.is_empty() {
            return Ok(());
        }
        if let Some(env_name) = &self.secret_key_env {
            self.secret_key = std::env::var(env_name)
                .map_err(|_| ConfigError::EnvVarNotFound(env_name.clone()))?;
        }
        Ok(())
    }

    /// Check the fields every gateway needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "access_key must not be empty".to_string(),
            ));
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.ack.max_retries == 0 || self.ack.tick_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "ack.max_retries and ack.tick_ms must be positive".to_string(),
            ));
        }
        if self.instructions.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "instructions.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Host to connect to, falling back to the protocol default
    pub fn api_host(&self) -> &str {
        self.host
            .as_deref()
            .unwrap_or_else(|| self.protocol.default_host())
    }

    /// Port to connect to, falling back to the protocol default
    pub fn api_port(&self) -> Option<u16> {
        self.port.or_else(|| self.protocol.default_port())
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cert_path", &self.cert_path)
            .field("ack", &self.ack)
            .field("instructions", &self.instructions)
            .finish()
    }
}
