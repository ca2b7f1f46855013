//! Configuration system for the shadow agent
//!
//! Configuration is loaded from a TOML file and may be partially overridden by
//! environment variables. Credentials are never stored in the file itself: MQTT
//! username/password are resolved from the named environment variables at
//! runtime, and TLS material is referenced by path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Environment variable overriding `mqtt.broker_url`
pub const ENV_BROKER_URL: &str = "SHADOW_AGENT_BROKER_URL";
/// Environment variable overriding `device.id`
pub const ENV_DEVICE_ID: &str = "SHADOW_AGENT_DEVICE_ID";
/// Environment variable overriding `device.owner_id`
pub const ENV_OWNER_ID: &str = "SHADOW_AGENT_OWNER_ID";
/// Environment variable overriding `telemetry.interval_secs`
pub const ENV_TELEMETRY_INTERVAL: &str = "SHADOW_AGENT_TELEMETRY_INTERVAL";

/// Smallest keep-alive the MQTT session is allowed to negotiate
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub shadow: ShadowSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9:._-]+). Used as the MQTT
    /// client id and as the root of every device topic.
    pub id: String,
    /// Owner identifier stamped on every telemetry reading
    pub owner_id: String,
}

/// MQTT session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Root CA bundle used to verify the broker
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// Private key matching `cert_path`
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds (default: 6)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Start a clean session on connect (default: false, persistent session)
    #[serde(default)]
    pub clean_session: bool,
    /// Register a last will that reports `status: disconnected` on an
    /// ungraceful connection drop
    #[serde(default)]
    pub last_will: bool,
    /// Give up after this many consecutive failed reconnects (default: never).
    /// The agent exits once the session has been given up.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_keep_alive() -> u64 {
    6
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

impl MqttSection {
    /// Username read from `username_env`, if both are set
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Password read from `password_env`, if both are set
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

/// Telemetry loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Default telemetry interval in seconds, used until a shadow delta changes it
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Measurement name used as the key inside `deviceData`
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Unit reported alongside the measurement
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_interval() -> u64 {
    10
}

fn default_measurement() -> String {
    "Pressure".to_string()
}

fn default_unit() -> String {
    "PSI".to_string()
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            measurement: default_measurement(),
            unit: default_unit(),
        }
    }
}

/// Shadow protocol settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowSection {
    /// Fleet-wide error channel subscribed for visibility
    #[serde(default = "default_error_topic")]
    pub error_topic: String,
    /// How long startup waits for subscription acknowledgements
    #[serde(default = "default_subscription_timeout")]
    pub subscription_timeout_ms: u64,
}

fn default_error_topic() -> String {
    "error/dynamodb".to_string()
}

fn default_subscription_timeout() -> u64 {
    2000
}

impl Default for ShadowSection {
    fn default() -> Self {
        Self {
            error_topic: default_error_topic(),
            subscription_timeout_ms: default_subscription_timeout(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AgentConfig = toml::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Override selected fields from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(broker_url) = std::env::var(ENV_BROKER_URL) {
            self.mqtt.broker_url = broker_url;
        }
        if let Ok(device_id) = std::env::var(ENV_DEVICE_ID) {
            self.device.id = device_id;
        }
        if let Ok(owner_id) = std::env::var(ENV_OWNER_ID) {
            self.device.owner_id = owner_id;
        }
        if let Ok(interval) = std::env::var(ENV_TELEMETRY_INTERVAL) {
            self.telemetry.interval_secs = interval.trim().parse().map_err(|_| {
                ConfigError::InvalidConfig(format!(
                    "{ENV_TELEMETRY_INTERVAL} must be a positive integer, got '{interval}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Check every invariant the agent relies on at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        if self.device.owner_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "device.owner_id must not be empty".to_string(),
            ));
        }

        if self.telemetry.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry.interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.telemetry.measurement.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "telemetry.measurement must not be empty".to_string(),
            ));
        }

        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }

        if self.mqtt.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_reconnect_attempts must be at least 1 when set".to_string(),
            ));
        }

        if self.mqtt.cert_path.is_some() != self.mqtt.key_path.is_some() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.cert_path and mqtt.key_path must be set together".to_string(),
            ));
        }

        let url = Url::parse(&self.mqtt.broker_url).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "mqtt.broker_url '{}' is not a valid URL: {e}",
                self.mqtt.broker_url
            ))
        })?;
        match url.scheme() {
            "mqtt" => {}
            "mqtts" => {
                if self.mqtt.ca_path.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "mqtts:// requires mqtt.ca_path".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "Unsupported broker URL scheme '{other}' (expected mqtt or mqtts)"
                )));
            }
        }

        if self.shadow.error_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "shadow.error_topic must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
owner_id = "test-owner"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
interval_secs = 10
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate device ID format. Colons are allowed so MAC-address identifiers work.
pub fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':'));

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9:._-]+"
        )));
    }

    Ok(())
}
