//! Message bodies exchanged with the broker
//!
//! Inbound shadow documents are handled as generic JSON values; the broker
//! owns their shape and may add fields at any time. Outbound bodies are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shadow field holding the telemetry interval in seconds
pub const TELEMETRY_INTERVAL_FIELD: &str = "telemetryIntervalSeconds";

/// Shadow field holding the connection status
pub const STATUS_FIELD: &str = "status";

/// Connection status mirrored into `reported.status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial `reported` state sent to the shadow update topic
///
/// # Examples
/// ```
/// use shadow_agent::protocol::{ConnectionStatus, ReportedState};
///
/// let state = ReportedState::new().with_status(ConnectionStatus::Connected);
/// let body = serde_json::to_string(&state.into_update()).unwrap();
/// assert_eq!(body, r#"{"state":{"reported":{"status":"connected"}}}"#);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ReportedState(pub Map<String, Value>);

impl ReportedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the telemetry interval that is now in effect
    pub fn with_telemetry_interval(mut self, seconds: u64) -> Self {
        self.0
            .insert(TELEMETRY_INTERVAL_FIELD.to_string(), Value::from(seconds));
        self
    }

    /// Report the connection status
    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.0
            .insert(STATUS_FIELD.to_string(), Value::from(status.as_str()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wrap into the `{"state": {"reported": ...}}` envelope
    pub fn into_update(self) -> ShadowUpdate {
        ShadowUpdate {
            state: ShadowUpdateState { reported: self },
        }
    }
}

/// Body published to the shadow update topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowUpdate {
    pub state: ShadowUpdateState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowUpdateState {
    pub reported: ReportedState,
}

/// Body published to the shadow get topic (always `{}`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShadowGetRequest {}

/// Error body the broker sends on `get/rejected`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShadowErrorResponse {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "clientToken")]
    pub client_token: Option<String>,
}

/// One sensor sample, built fresh every telemetry cycle
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub owner_id: String,
    pub measurement: String,
    pub value: f64,
    pub unit: String,
}

impl TelemetryReading {
    /// Build the telemetry body:
    /// `{"ownerID": .., "deviceData": {"<M>": value, "<M>-unit": unit}}`
    pub fn to_payload(&self) -> TelemetryPayload {
        let mut device_data = Map::new();
        device_data.insert(self.measurement.clone(), Value::from(self.value));
        device_data.insert(
            format!("{}-unit", self.measurement),
            Value::from(self.unit.clone()),
        );

        TelemetryPayload {
            owner_id: self.owner_id.clone(),
            device_data,
        }
    }
}

/// Body published to the telemetry topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPayload {
    #[serde(rename = "ownerID")]
    pub owner_id: String,
    #[serde(rename = "deviceData")]
    pub device_data: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_status_serialization() {
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Connected).unwrap(),
            json!("connected")
        );
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Disconnected).unwrap(),
            json!("disconnected")
        );
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_shadow_update_envelope() {
        let update = ReportedState::new().with_telemetry_interval(5).into_update();

        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"state": {"reported": {"telemetryIntervalSeconds": 5}}})
        );
    }

    #[test]
    fn test_reported_state_combines_fields() {
        let state = ReportedState::new()
            .with_status(ConnectionStatus::Connected)
            .with_telemetry_interval(30);

        assert_eq!(state.get(STATUS_FIELD), Some(&json!("connected")));
        assert_eq!(state.get(TELEMETRY_INTERVAL_FIELD), Some(&json!(30)));
        assert!(!state.is_empty());
        assert!(ReportedState::new().is_empty());
    }

    #[test]
    fn test_get_request_is_empty_object() {
        assert_eq!(serde_json::to_string(&ShadowGetRequest {}).unwrap(), "{}");
    }

    #[test]
    fn test_telemetry_payload_shape() {
        let reading = TelemetryReading {
            owner_id: "owner-1".to_string(),
            measurement: "Pressure".to_string(),
            value: 1234.56,
            unit: "PSI".to_string(),
        };

        assert_eq!(
            serde_json::to_value(reading.to_payload()).unwrap(),
            json!({
                "ownerID": "owner-1",
                "deviceData": {
                    "Pressure": 1234.56,
                    "Pressure-unit": "PSI"
                }
            })
        );
    }

    #[test]
    fn test_error_response_parses_broker_body() {
        let body = json!({"code": 404, "message": "No shadow exists with name: 'dev'"});
        let parsed: ShadowErrorResponse = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.code, Some(404));
        assert!(parsed.message.unwrap().contains("No shadow exists"));
        assert_eq!(parsed.client_token, None);
    }

    #[test]
    fn test_error_response_tolerates_unknown_shape() {
        let parsed: ShadowErrorResponse = serde_json::from_value(json!({"other": 1})).unwrap();
        assert_eq!(parsed, ShadowErrorResponse::default());
    }
}
