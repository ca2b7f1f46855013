//! Topic layout for a single device
//!
//! Every device owns one telemetry topic and a family of shadow topics rooted
//! at `$shadow/{device_id}`. The fleet error channel is shared by all devices
//! and only subscribed for visibility.

/// Root of every shadow topic for a device
pub fn shadow_root(device_id: &str) -> String {
    format!("$shadow/{device_id}")
}

/// Resolved topic names for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    /// `D/telemetry` (publish)
    pub telemetry: String,
    /// `$shadow/D/get` (publish)
    pub get: String,
    /// `$shadow/D/update` (publish)
    pub update: String,
    /// `$shadow/D/update/delta` (subscribe)
    pub delta: String,
    /// `$shadow/D/get/accepted` (subscribe)
    pub get_accepted: String,
    /// `$shadow/D/get/rejected` (subscribe)
    pub get_rejected: String,
    /// `error/<sink>` (subscribe)
    pub fleet_error: String,
}

impl ShadowTopics {
    /// Build the topic set for `device_id`, with `error_topic` as the fleet error channel
    pub fn new(device_id: &str, error_topic: &str) -> Self {
        let root = shadow_root(device_id);
        Self {
            telemetry: format!("{device_id}/telemetry"),
            get: format!("{root}/get"),
            update: format!("{root}/update"),
            delta: format!("{root}/update/delta"),
            get_accepted: format!("{root}/get/accepted"),
            get_rejected: format!("{root}/get/rejected"),
            fleet_error: error_topic.to_string(),
        }
    }

    /// Topics the agent subscribes to, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.delta.clone(),
            self.get_accepted.clone(),
            self.get_rejected.clone(),
            self.fleet_error.clone(),
        ]
    }
}
