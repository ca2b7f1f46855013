//! Inbound message dispatch
//!
//! The transport forwards every inbound publish into a channel; the router
//! drains it on its own task, matches the topic exactly and hands the parsed
//! document to the shadow reconciler. Nothing here is fatal: unknown topics
//! and bad payloads are logged and dropped.

use crate::protocol::ShadowTopics;
use crate::shadow::{DeltaDecision, ShadowReconciler};
use crate::transport::{InboundMessage, Transport};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Why an inbound payload was discarded
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Payload is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

/// Handler a topic maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ShadowDelta,
    ShadowGetAccepted,
    ShadowGetRejected,
    FleetError,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delta(DeltaDecision),
    GetAccepted,
    GetRejected,
    FleetError,
    /// No handler for the topic
    Unrouted,
    /// Topic matched but the payload could not be parsed
    Discarded(Route),
}

/// Parse a payload as UTF-8 JSON
pub fn parse_payload(payload: &[u8]) -> Result<Value, RouterError> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

pub struct MessageRouter<T: Transport> {
    topics: ShadowTopics,
    reconciler: Arc<ShadowReconciler<T>>,
}

impl<T: Transport + 'static> MessageRouter<T> {
    pub fn new(reconciler: Arc<ShadowReconciler<T>>) -> Self {
        Self {
            topics: reconciler.topics().clone(),
            reconciler,
        }
    }

    /// Exact topic match
    pub fn route(&self, topic: &str) -> Option<Route> {
        if topic == self.topics.delta {
            Some(Route::ShadowDelta)
        } else if topic == self.topics.get_accepted {
            Some(Route::ShadowGetAccepted)
        } else if topic == self.topics.get_rejected {
            Some(Route::ShadowGetRejected)
        } else if topic == self.topics.fleet_error {
            Some(Route::FleetError)
        } else {
            None
        }
    }

    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let Some(route) = self.route(&message.topic) else {
            warn!(topic = %message.topic, "No handler for topic, message dropped");
            return DispatchOutcome::Unrouted;
        };

        let doc = match parse_payload(&message.payload) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    bytes = message.payload.len(),
                    "Discarding message: {}",
                    e
                );
                return DispatchOutcome::Discarded(route);
            }
        };

        debug!(topic = %message.topic, route = ?route, "Dispatching message");
        match route {
            Route::ShadowDelta => {
                DispatchOutcome::Delta(self.reconciler.on_shadow_delta(doc).await)
            }
            Route::ShadowGetAccepted => {
                self.reconciler.on_shadow_get_accepted(doc);
                DispatchOutcome::GetAccepted
            }
            Route::ShadowGetRejected => {
                self.reconciler.on_shadow_get_rejected(doc);
                DispatchOutcome::GetRejected
            }
            Route::FleetError => {
                warn!(topic = %message.topic, error = %doc, "Fleet error reported");
                DispatchOutcome::FleetError
            }
        }
    }

    /// Drain `inbound_rx` until it closes or shutdown is signalled.
    /// Returns the number of dispatched messages.
    pub async fn run(
        &self,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> u64 {
        let mut dispatched = 0u64;

        loop {
            tokio::select! {
                message = inbound_rx.recv() => match message {
                    Some(message) => {
                        self.dispatch(message).await;
                        dispatched += 1;
                    }
                    None => {
                        debug!("Inbound channel closed");
                        break;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(dispatched, "Message router stopped");
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::DeviceConfig;
    use crate::testing::mocks::MockTransport;

    fn router(transport: &MockTransport) -> MessageRouter<MockTransport> {
        let reconciler = ShadowReconciler::new(
            Arc::new(transport.clone()),
            ShadowTopics::new("dev", "error/dynamodb"),
            "dev",
            Arc::new(DeviceConfig::new(10).unwrap()),
        );
        MessageRouter::new(Arc::new(reconciler))
    }

    #[test]
    fn test_route_exact_match() {
        let router = router(&MockTransport::new());

        assert_eq!(router.route("$shadow/dev/update/delta"), Some(Route::ShadowDelta));
        assert_eq!(router.route("$shadow/dev/get/accepted"), Some(Route::ShadowGetAccepted));
        assert_eq!(router.route("$shadow/dev/get/rejected"), Some(Route::ShadowGetRejected));
        assert_eq!(router.route("error/dynamodb"), Some(Route::FleetError));

        assert_eq!(router.route("$shadow/dev/update"), None);
        assert_eq!(router.route("$shadow/other/update/delta"), None);
        assert_eq!(router.route("$shadow/dev/update/delta/"), None);
        assert_eq!(router.route(""), None);
    }

    #[test]
    fn test_parse_payload_errors() {
        assert!(matches!(
            parse_payload(&[0xff, 0xfe]),
            Err(RouterError::InvalidUtf8(_))
        ));
        assert!(matches!(
            parse_payload(b"{not json"),
            Err(RouterError::MalformedJson(_))
        ));
        assert_eq!(parse_payload(b"{}").unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_malformed_payload_never_reaches_handler() {
        let transport = MockTransport::new();
        let router = router(&transport);

        let outcome = router
            .dispatch(InboundMessage::new("$shadow/dev/update/delta", b"{\"state\":".to_vec()))
            .await;

        assert_eq!(outcome, DispatchOutcome::Discarded(Route::ShadowDelta));
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_unrouted_topic_dropped() {
        let router = router(&MockTransport::new());

        let outcome = router
            .dispatch(InboundMessage::new("somewhere/else", b"{}".to_vec()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Unrouted);
    }

    #[tokio::test]
    async fn test_fleet_error_is_logged_only() {
        let transport = MockTransport::new();
        let router = router(&transport);

        let outcome = router
            .dispatch(InboundMessage::new(
                "error/dynamodb",
                br#"{"error":"ProvisionedThroughputExceeded"}"#.to_vec(),
            ))
            .await;

        assert_eq!(outcome, DispatchOutcome::FleetError);
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let router = router(&MockTransport::new());
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            let _ = shutdown_tx.send(true);
        });

        assert_eq!(router.run(inbound_rx, shutdown_rx).await, 0);
        stopper.await.unwrap();
    }
}
