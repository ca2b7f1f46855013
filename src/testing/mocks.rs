//! Mock implementations for testing
//!
//! Provides a mock Transport and a fixed sensor so the reconciler, telemetry
//! loop and supervisor can be exercised without a broker.

use crate::telemetry::SensorSource;
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{InboundMessage, QoS, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// One publish seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

impl PublishedMessage {
    /// Payload parsed as JSON; `Value::Null` if it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Calls made on the mock, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect,
    SetMessageSender,
    Subscribe(String),
    WaitForSubscriptions,
    Publish(String),
    Disconnect,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock transport for testing. Clones share state, so a test can keep one
/// handle while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
    message_sender: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
    connected: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
    fail_publish: Arc<AtomicBool>,
    fail_subscribe: Arc<AtomicBool>,
    suback_timeout: Arc<AtomicBool>,
    permanently_disconnected: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `connect` fails
    pub fn with_failure() -> Self {
        let transport = Self::default();
        transport.fail_connect.store(true, Ordering::SeqCst);
        transport
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make `wait_for_subscriptions` report a timeout
    pub fn set_suback_timeout(&self, timeout: bool) {
        self.suback_timeout.store(timeout, Ordering::SeqCst);
    }

    pub fn set_permanently_disconnected(&self, disconnected: bool) {
        self.permanently_disconnected
            .store(disconnected, Ordering::SeqCst);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        lock(&self.published_messages).clone()
    }

    /// Publishes on one topic, in order
    pub async fn get_published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.published_messages)
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        lock(&self.subscriptions).clone()
    }

    pub async fn get_calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    /// Deliver a message as if it arrived from the broker.
    /// Returns false when no sender is registered or the receiver is gone.
    pub async fn inject_message(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let sender = lock(&self.message_sender).clone();
        match sender {
            Some(sender) => sender
                .send(InboundMessage::new(topic, payload))
                .await
                .is_ok(),
            None => false,
        }
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.record(TransportCall::Connect);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.record(TransportCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        self.record(TransportCall::Publish(topic.to_string()));
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }

        lock(&self.published_messages).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        self.record(TransportCall::Subscribe(topic.to_string()));
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed(
                "Mock subscribe failure".into(),
            ));
        }

        lock(&self.subscriptions).push((topic.to_string(), qos));
        Ok(())
    }

    async fn wait_for_subscriptions(&self, timeout: Duration) -> bool {
        self.record(TransportCall::WaitForSubscriptions);
        if self.suback_timeout.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return false;
        }
        true
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.record(TransportCall::SetMessageSender);
        *lock(&self.message_sender) = Some(sender);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        if self.permanently_disconnected.load(Ordering::SeqCst) {
            Some(ConnectionState::PermanentlyDisconnected(
                "Mock permanent failure".to_string(),
            ))
        } else if self.is_connected() {
            Some(ConnectionState::Connected)
        } else {
            None
        }
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected.load(Ordering::SeqCst)
    }
}

/// Sensor returning a constant value and counting how often it was read
#[derive(Debug, Clone, Default)]
pub struct FixedSensor {
    value: f64,
    samples: Arc<AtomicUsize>,
}

impl FixedSensor {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl SensorSource for FixedSensor {
    fn sample(&self) -> f64 {
        self.samples.fetch_add(1, Ordering::SeqCst);
        self.value
    }
}
