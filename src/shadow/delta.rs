//! Pure evaluation of shadow delta documents

use super::IntervalRejection;
use crate::protocol::TELEMETRY_INTERVAL_FIELD;
use serde_json::Value;

/// What a delta asks of the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaDecision {
    /// Adopt this interval and report it back
    Apply(u64),
    /// No field this device understands
    Ignore,
    /// The interval field is present but unusable
    Reject(IntervalRejection),
}

/// Inspect `doc.state.telemetryIntervalSeconds`
///
/// # Examples
/// ```
/// use serde_json::json;
/// use shadow_agent::shadow::{evaluate_delta, DeltaDecision};
///
/// let doc = json!({"state": {"telemetryIntervalSeconds": 5}, "version": 7});
/// assert_eq!(evaluate_delta(&doc), DeltaDecision::Apply(5));
/// assert_eq!(evaluate_delta(&json!({"state": {}})), DeltaDecision::Ignore);
/// ```
pub fn evaluate_delta(doc: &Value) -> DeltaDecision {
    let Some(value) = doc
        .get("state")
        .and_then(|state| state.get(TELEMETRY_INTERVAL_FIELD))
    else {
        return DeltaDecision::Ignore;
    };

    match parse_interval(value) {
        Ok(seconds) => DeltaDecision::Apply(seconds),
        Err(rejection) => DeltaDecision::Reject(rejection),
    }
}

/// Accept only JSON integers greater than zero
pub fn parse_interval(value: &Value) -> Result<u64, IntervalRejection> {
    match value {
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(0), _) => Err(IntervalRejection::NotPositive(n.to_string())),
            (Some(seconds), _) => Ok(seconds),
            (None, Some(_)) => Err(IntervalRejection::NotPositive(n.to_string())),
            (None, None) => Err(IntervalRejection::NotAnInteger(n.to_string())),
        },
        other => Err(IntervalRejection::WrongType(other.to_string())),
    }
}

/// Version stamp the broker attaches to deltas, if any
pub fn delta_version(doc: &Value) -> Option<u64> {
    doc.get("version").and_then(Value::as_u64)
}
