//! Pure connection state management for MQTT client
//!
//! This module contains connection state, reconnection configuration and the
//! construction of `MqttOptions` from the agent configuration.

use crate::config::MqttSection;
use crate::protocol::{shadow_root, ConnectionStatus, ReportedState};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Permanently disconnected - max reconnection attempts exceeded
    PermanentlyDisconnected(String),
}

impl ConnectionState {
    /// Publishes and subscriptions are only accepted on an established session
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection configuration for the session itself.
/// Individual publishes are never retried.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![1000, 2000, 5000, 10000],
            sustained_delay: 10000,
        }
    }
}

impl ReconnectConfig {
    /// Default backoff with the attempt limit from `mqtt.max_reconnect_attempts`
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            ..Self::default()
        }
    }

    /// Calculate the maximum total time for all reconnection attempts
    /// Returns None if unlimited retries are configured
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..=max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Calculate backoff delay for given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Failed to read credential file {path}")]
    CredentialRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

fn read_credential(path: &Path) -> Result<Vec<u8>, MqttError> {
    std::fs::read(path).map_err(|source| MqttError::CredentialRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the TLS transport from the configured credential files
fn configure_tls(config: &MqttSection) -> Result<RumqttcTransport, MqttError> {
    let ca_path = config.ca_path.as_ref().ok_or_else(|| {
        MqttError::InvalidBrokerUrl(format!("{} requires a CA bundle", config.broker_url))
    })?;
    let ca = read_credential(ca_path)?;

    let client_auth = match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            Some((read_credential(cert_path)?, read_credential(key_path)?))
        }
        _ => None,
    };

    Ok(RumqttcTransport::tls(ca, client_auth, None))
}

/// Build the last will body: `reported.status = disconnected`
pub fn last_will_payload() -> Result<String, MqttError> {
    let update = ReportedState::new()
        .with_status(ConnectionStatus::Disconnected)
        .into_update();
    serde_json::to_string(&update).map_err(MqttError::SerializationError)
}

/// Configure MQTT options from config.
/// The device id doubles as the client id, so the broker can tie the
/// persistent session to the device.
pub fn configure_mqtt_options(
    device_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(device_id, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(configure_tls(config)?);
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(&username, &password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(config.clean_session);

    if config.last_will {
        let topic = format!("{}/update", shadow_root(device_id));
        let lwt = LastWill::new(
            &topic,
            last_will_payload()?,
            QoS::AtLeastOnce,
            false,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            ca_path: None,
            cert_path: None,
            key_path: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: 6,
            clean_session: false,
            last_will: false,
            max_reconnect_attempts: None,
        }
    }

    #[test]
    fn test_reconnect_limit_comes_from_config() {
        let mut config = test_mqtt_config();
        assert_eq!(ReconnectConfig::from_section(&config).max_attempts, None);

        config.max_reconnect_attempts = Some(4);
        let reconnect = ReconnectConfig::from_section(&config);
        assert_eq!(reconnect.max_attempts, Some(4));
        assert_eq!(reconnect.backoff_pattern, vec![1000, 2000, 5000, 10000]);
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff_pattern, vec![1000, 2000, 5000, 10000]);
        assert_eq!(config.sustained_delay, 10000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 1000);
        assert_eq!(config.calculate_backoff_delay(2), 2000);
        assert_eq!(config.calculate_backoff_delay(4), 10000);
        assert_eq!(config.calculate_backoff_delay(5), 10000);
        assert_eq!(config.calculate_backoff_delay(100), 10000);
    }

    #[test]
    fn test_calculate_max_total_time() {
        let config = ReconnectConfig {
            max_attempts: Some(5),
            backoff_pattern: vec![100, 200],
            sustained_delay: 300,
        };
        assert_eq!(config.calculate_max_total_time(), Some(100 + 200 + 300 * 3));

        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_configure_plain_mqtt_options() {
        let options = configure_mqtt_options("sensor-01", &test_mqtt_config()).unwrap();

        assert_eq!(options.client_id(), "sensor-01");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(6));
        assert!(!options.clean_start());
    }

    #[test]
    fn test_default_port_for_plain_scheme() {
        let mut config = test_mqtt_config();
        config.broker_url = "mqtt://broker.example.com".to_string();

        let options = configure_mqtt_options("sensor-01", &config).unwrap();
        assert_eq!(options.broker_address().1, 1883);
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = test_mqtt_config();
        config.broker_url = "invalid-url".to_string();

        let result = configure_mqtt_options("sensor-01", &config);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_mqtts_missing_ca_file() {
        let mut config = test_mqtt_config();
        config.broker_url = "mqtts://broker.example.com".to_string();
        config.ca_path = Some(PathBuf::from("/nonexistent/ca.pem"));

        let result = configure_mqtt_options("sensor-01", &config);
        assert!(matches!(result, Err(MqttError::CredentialRead { .. })));
    }

    #[test]
    fn test_mqtts_reads_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("ca.pem");
        std::fs::File::create(&ca_path)
            .unwrap()
            .write_all(b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n")
            .unwrap();

        let mut config = test_mqtt_config();
        config.broker_url = "mqtts://broker.example.com".to_string();
        config.ca_path = Some(ca_path);

        let options = configure_mqtt_options("sensor-01", &config).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn test_last_will_payload() {
        let payload = last_will_payload().unwrap();
        assert_eq!(payload, r#"{"state":{"reported":{"status":"disconnected"}}}"#);
    }

    #[test]
    fn test_last_will_registered_when_enabled() {
        let mut config = test_mqtt_config();
        config.last_will = true;

        let options = configure_mqtt_options("sensor-01", &config).unwrap();
        assert!(options.last_will().is_some());

        let options = configure_mqtt_options("sensor-01", &test_mqtt_config()).unwrap();
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected("test".to_string()),
            },
            MqttError::ConnectionFailedStr("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
