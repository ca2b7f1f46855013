//! Device shadow synchronization
//!
//! The reconciler owns [`DeviceConfig`] and speaks the shadow protocol:
//! it asks for the current document once at startup, applies valid deltas
//! and echoes every applied value back as `reported` state.

use super::delta::{delta_version, evaluate_delta, DeltaDecision};
use super::DeviceConfig;
use crate::error::{AgentError, AgentResult};
use crate::protocol::{
    ConnectionStatus, ReportedState, ShadowErrorResponse, ShadowGetRequest, ShadowTopics,
};
use crate::shadow_span;
use crate::transport::{QoS, Transport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

pub struct ShadowReconciler<T: Transport> {
    transport: Arc<T>,
    topics: ShadowTopics,
    device_id: String,
    config: Arc<DeviceConfig>,
}

impl<T: Transport + 'static> ShadowReconciler<T> {
    pub fn new(
        transport: Arc<T>,
        topics: ShadowTopics,
        device_id: impl Into<String>,
        config: Arc<DeviceConfig>,
    ) -> Self {
        Self {
            transport,
            topics,
            device_id: device_id.into(),
            config,
        }
    }

    pub fn device_config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    async fn publish_json<B: serde::Serialize>(&self, topic: &str, body: &B) -> AgentResult<()> {
        let payload = serde_json::to_vec(body)?;
        self.transport
            .publish(topic, payload, QoS::AtLeastOnce)
            .await
            .map_err(AgentError::transport)
    }

    /// Ask the broker for the whole shadow document.
    /// The answer arrives later on `get/accepted` or `get/rejected`.
    pub async fn request_current_shadow(&self) -> AgentResult<()> {
        self.publish_json(&self.topics.get, &ShadowGetRequest {}).await?;
        info!(device_id = %self.device_id, topic = %self.topics.get, "Requested current shadow");
        Ok(())
    }

    /// Log the cloud's view of the reported state. Never changes local config.
    pub fn on_shadow_get_accepted(&self, doc: Value) -> Option<Value> {
        let reported = doc
            .get("state")
            .and_then(|state| state.get("reported"))
            .cloned();

        match &reported {
            Some(reported) => info!(
                device_id = %self.device_id,
                reported = %reported,
                "Shadow has reported state"
            ),
            None => info!(device_id = %self.device_id, "Shadow has no reported state yet"),
        }

        reported
    }

    /// Log the broker's refusal. The request is not retried.
    pub fn on_shadow_get_rejected(&self, doc: Value) -> ShadowErrorResponse {
        let response: ShadowErrorResponse = serde_json::from_value(doc).unwrap_or_default();

        warn!(
            device_id = %self.device_id,
            code = ?response.code,
            message = response.message.as_deref().unwrap_or("<none>"),
            "Shadow get request rejected"
        );

        response
    }

    /// Apply a delta and confirm it through `reported`
    pub async fn on_shadow_delta(&self, doc: Value) -> DeltaDecision {
        let version = delta_version(&doc);
        let decision = evaluate_delta(&doc);
        let span = shadow_span!(device_id = %self.device_id, version = ?version);

        async {
            match &decision {
                DeltaDecision::Apply(seconds) => {
                    if let Err(rejection) = self.config.set_telemetry_interval_secs(*seconds) {
                        // evaluate_delta never yields zero
                        error!("Delta passed evaluation but was refused: {}", rejection);
                        return;
                    }
                    info!(interval_secs = seconds, "Applied telemetry interval from shadow delta");

                    let state = ReportedState::new().with_telemetry_interval(*seconds);
                    if let Err(e) = self.report_state(state).await {
                        error!(interval_secs = seconds, "Failed to report applied interval: {}", e);
                    }
                }
                DeltaDecision::Ignore => {
                    debug!("Shadow delta carries no recognized field");
                }
                DeltaDecision::Reject(rejection) => {
                    warn!(
                        interval_secs = self.config.telemetry_interval_secs(),
                        "Rejected shadow delta: {}", rejection
                    );
                }
            }
        }
        .instrument(span)
        .await;

        decision
    }

    /// Publish `{"state": {"reported": state}}` to the update topic
    pub async fn report_state(&self, state: ReportedState) -> AgentResult<()> {
        self.publish_json(&self.topics.update, &state.into_update()).await?;
        debug!(device_id = %self.device_id, topic = %self.topics.update, "Reported shadow state");
        Ok(())
    }

    pub async fn report_status(&self, status: ConnectionStatus) -> AgentResult<()> {
        self.report_state(ReportedState::new().with_status(status)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;
    use serde_json::json;

    fn reconciler(transport: &MockTransport) -> ShadowReconciler<MockTransport> {
        ShadowReconciler::new(
            Arc::new(transport.clone()),
            ShadowTopics::new("dev", "error/dynamodb"),
            "dev",
            Arc::new(DeviceConfig::new(10).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_request_current_shadow_publishes_empty_object() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        reconciler.request_current_shadow().await.unwrap();

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "$shadow/dev/get");
        assert_eq!(published[0].payload, b"{}");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_valid_delta_applies_and_reports() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        let decision = reconciler
            .on_shadow_delta(json!({"state": {"telemetryIntervalSeconds": 5}}))
            .await;

        assert_eq!(decision, DeltaDecision::Apply(5));
        assert_eq!(reconciler.device_config().telemetry_interval_secs(), 5);

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "$shadow/dev/update");
        assert_eq!(
            published[0].json(),
            json!({"state": {"reported": {"telemetryIntervalSeconds": 5}}})
        );
    }

    #[tokio::test]
    async fn test_invalid_delta_changes_nothing() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        let decision = reconciler
            .on_shadow_delta(json!({"state": {"telemetryIntervalSeconds": -3}}))
            .await;

        assert!(matches!(decision, DeltaDecision::Reject(_)));
        assert_eq!(reconciler.device_config().telemetry_interval_secs(), 10);
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_failure_keeps_applied_value() {
        let transport = MockTransport::new();
        transport.set_publish_failure(true);
        let reconciler = reconciler(&transport);

        let decision = reconciler
            .on_shadow_delta(json!({"state": {"telemetryIntervalSeconds": 30}}))
            .await;

        assert_eq!(decision, DeltaDecision::Apply(30));
        assert_eq!(reconciler.device_config().telemetry_interval_secs(), 30);
    }

    #[tokio::test]
    async fn test_get_accepted_is_advisory() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        let reported = reconciler.on_shadow_get_accepted(json!({
            "state": {
                "desired": {"telemetryIntervalSeconds": 1},
                "reported": {"status": "connected"}
            }
        }));

        assert_eq!(reported, Some(json!({"status": "connected"})));
        assert_eq!(reconciler.device_config().telemetry_interval_secs(), 10);
        assert!(transport.get_published_messages().await.is_empty());

        assert_eq!(reconciler.on_shadow_get_accepted(json!({"state": {}})), None);
    }

    #[tokio::test]
    async fn test_get_rejected_parses_error_body() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        let response = reconciler
            .on_shadow_get_rejected(json!({"code": 404, "message": "No shadow exists"}));
        assert_eq!(response.code, Some(404));
        assert_eq!(response.message.as_deref(), Some("No shadow exists"));

        let response = reconciler.on_shadow_get_rejected(json!("not an object"));
        assert_eq!(response, ShadowErrorResponse::default());
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_status() {
        let transport = MockTransport::new();
        let reconciler = reconciler(&transport);

        reconciler
            .report_status(ConnectionStatus::Disconnected)
            .await
            .unwrap();

        let published = transport.get_published_messages().await;
        assert_eq!(
            published[0].json(),
            json!({"state": {"reported": {"status": "disconnected"}}})
        );
    }

    #[tokio::test]
    async fn test_report_state_surfaces_transport_error() {
        let transport = MockTransport::new();
        transport.set_publish_failure(true);
        let reconciler = reconciler(&transport);

        let error = reconciler
            .report_status(ConnectionStatus::Connected)
            .await
            .unwrap_err();
        assert!(error.is_transport());
    }
}
