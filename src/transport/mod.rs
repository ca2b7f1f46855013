//! Transport layer for the device session
//!
//! This module provides the transport abstraction the agent is written
//! against, plus the MQTT implementation used in production.

use std::time::Duration;

pub use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

/// Message delivered by the transport on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Transport trait for the device session
///
/// This trait provides an abstraction over the pub/sub connection so the
/// supervisor, reconciler and telemetry loop can be tested without a broker.
/// Only `connect` needs exclusive access; everything after it works through
/// a shared reference so the session can be held in an `Arc`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker, returning once the session is confirmed
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a payload to `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error>;

    /// Subscribe to `topic`; messages are delivered to the message sender
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Wait until the broker has answered every requested subscription.
    /// Returns false if `timeout` elapsed first or any subscription was refused.
    async fn wait_for_subscriptions(&self, timeout: Duration) -> bool;

    /// Set the channel inbound messages are forwarded to
    fn set_message_sender(&self, sender: tokio::sync::mpsc::Sender<InboundMessage>);

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;
}
