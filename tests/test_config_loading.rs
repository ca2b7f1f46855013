//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of loading files from disk: what is accepted, what
//! defaults apply and which errors surface.

use shadow_agent::config::{AgentConfig, ConfigError};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
id = "pressure-sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "MQTT_USER"
password_env = "MQTT_PASS"

[telemetry]
interval_secs = 15
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "pressure-sensor-01");
    assert_eq!(config.device.owner_id, "owner-123");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USER"));
    assert_eq!(config.telemetry.interval_secs, 15);
    assert_eq!(config.telemetry.measurement, "Pressure");
    assert_eq!(config.shadow.error_topic, "error/dynamodb");
}

#[test]
fn test_sections_default_when_omitted() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtt://broker.local"
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.telemetry.interval_secs, 10);
    assert_eq!(config.telemetry.unit, "PSI");
    assert_eq!(config.mqtt.keep_alive_secs, 6);
    assert!(!config.mqtt.clean_session);
    assert_eq!(config.shadow.subscription_timeout_ms, 2000);
}

#[test]
fn test_tls_config_with_credential_paths() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtts://example-ats.iot.eu-west-1.amazonaws.com:8883"
ca_path = "certs/AmazonRootCA1.pem"
cert_path = "certs/device.pem.crt"
key_path = "certs/private.pem.key"
last_will = true
"#,
    );

    let config = AgentConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(
        config.mqtt.key_path.as_deref(),
        Some(Path::new("certs/private.pem.key"))
    );
    assert!(config.mqtt.last_will);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = AgentConfig::load_from_file(Path::new("/nonexistent/shadow-agent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[device\nid = ");

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_device_id_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor/01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_zero_interval_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
interval_secs = 0
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_negative_interval_fails_to_parse() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
interval_secs = -5
"#,
    );

    let result = AgentConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_mqtts_without_ca_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-01"
owner_id = "owner-123"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"
"#,
    );

    let err = AgentConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("ca_path"), "{err}");
}
