//! Impure I/O operations for MQTT client
//!
//! This module owns the rumqttc event loop task. The task confirms the
//! session, forwards inbound publishes to the dispatch channel, tallies
//! subscription acknowledgements and keeps the session alive across network
//! failures.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler};
use super::session::{self, RetryPlan, SessionEvent};
use crate::config::MqttSection;
use crate::mqtt_span;
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::SubscribeReasonCode;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the event loop to flush and stop
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type SharedSender = Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SubAcks seen so far and the filters the broker refused
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SubscriptionTally {
    acked: usize,
    refused: Vec<String>,
}

/// State shared between the client handle and its event loop task
struct EventLoopContext {
    device_id: String,
    client: AsyncClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    tally_tx: Arc<watch::Sender<SubscriptionTally>>,
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    awaiting_suback: Arc<Mutex<VecDeque<String>>>,
    message_sender: SharedSender,
    reconnect_config: ReconnectConfig,
}

impl EventLoopContext {
    fn enter(&self, event: SessionEvent) {
        let _ = self.state_tx.send(event.into_state());
    }
}

/// MQTT session for one device
pub struct MqttClient {
    device_id: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    awaiting_suback: Arc<Mutex<VecDeque<String>>>,
    message_sender: SharedSender,
    subscribe_requests: AtomicUsize,
    tally_tx: Arc<watch::Sender<SubscriptionTally>>,
}

impl MqttClient {
    pub fn new(device_id: &str, config: &MqttSection) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(device_id, config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (tally_tx, _) = watch::channel(SubscriptionTally::default());

        Ok(MqttClient {
            device_id: device_id.to_string(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            event_loop_handle: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            state_rx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::from_section(config),
            subscribed_topics: Arc::new(Mutex::new(Vec::new())),
            awaiting_suback: Arc::new(Mutex::new(VecDeque::new())),
            message_sender: Arc::new(Mutex::new(None)),
            subscribe_requests: AtomicUsize::new(0),
            tally_tx: Arc::new(tally_tx),
        })
    }

    /// Resolve once the session is `Connected`, or fail on the first
    /// disconnect or after `timeout`
    async fn wait_for_connack(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let settled = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| {
                !matches!(
                    state,
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_)
                )
            }),
        )
        .await;

        let state = match settled {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => {
                return Err(MqttError::ConnectionFailedStr(
                    "State channel closed".to_string(),
                ))
            }
            Err(_) => {
                return Err(MqttError::ConnectionFailedStr(
                    "ConnAck timeout - no connection confirmation received".to_string(),
                ))
            }
        };

        match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::PermanentlyDisconnected(reason) => Err(
                MqttError::ConnectionFailedStr(format!("Permanently disconnected: {reason}")),
            ),
            ConnectionState::Disconnected(reason) => Err(MqttError::ConnectionFailedStr(reason)),
            other => Err(MqttError::NotConnected { state: other }),
        }
    }

    /// Connect to the broker. Only returns success once a ConnAck arrived;
    /// the first network error aborts the attempt.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = lock(&self.event_loop).take().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let state_rx = self.state_tx.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let context = EventLoopContext {
            device_id: self.device_id.clone(),
            client: self.client.clone(),
            state_tx: self.state_tx.clone(),
            tally_tx: self.tally_tx.clone(),
            subscribed_topics: self.subscribed_topics.clone(),
            awaiting_suback: self.awaiting_suback.clone(),
            message_sender: self.message_sender.clone(),
            reconnect_config: self.reconnect_config.clone(),
        };

        info!(device_id = %self.device_id, "Connecting to MQTT broker");
        let span = mqtt_span!(device_id = %self.device_id);
        let handle =
            tokio::spawn(Self::run_event_loop(event_loop, context, shutdown_rx).instrument(span));
        *lock(&self.event_loop_handle) = Some(handle);

        let timeout = session::connack_timeout(&self.reconnect_config);
        if let Err(e) = Self::wait_for_connack(state_rx, timeout).await {
            self.signal_shutdown();
            return Err(e);
        }

        info!(device_id = %self.device_id, "Connected to MQTT broker");
        Ok(())
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        context: EventLoopContext,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut retries = 0u32;
        let mut established = false;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                polled = event_loop.poll() => {
                    let keep_running = match polled {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if matches!(route, EventRoute::ConnectionAcknowledged { .. }) {
                                established = true;
                            }
                            Self::process_event_route(route, &context, &mut retries, &shutdown_rx)
                                .await
                        }
                        Err(e) => {
                            context.enter(SessionEvent::NetworkFailure(e.to_string()));
                            // Before the first ConnAck a failure ends `connect`
                            established
                                && Self::wait_before_retry(&context, &mut retries, &shutdown_rx)
                                    .await
                        }
                    };

                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!(device_id = %context.device_id, "MQTT event loop stopped");
    }

    /// Act on one routed event. Returns false once the loop should stop.
    async fn process_event_route(
        route: EventRoute,
        context: &EventLoopContext,
        retries: &mut u32,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                context.enter(SessionEvent::Established);
                *retries = 0;
                if !session_present {
                    Self::resubscribe_to_topics(context).await;
                }
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                Self::forward_message(context, topic, payload);
                true
            }
            EventRoute::Disconnected => {
                context.enter(SessionEvent::BrokerClosed);
                Self::wait_before_retry(context, retries, shutdown_rx).await
            }
            EventRoute::SubscriptionConfirmed { packet_id, refused } => {
                Self::record_suback(context, packet_id, &refused);
                true
            }
            EventRoute::DisconnectSent => {
                let _ = context
                    .state_tx
                    .send(ConnectionState::Disconnected("Client disconnected".to_string()));
                false
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Match a SubAck with the oldest outstanding filter. Every SUBSCRIBE
    /// carries a single filter, so acknowledgements arrive in request order.
    fn record_suback(context: &EventLoopContext, packet_id: u16, refused: &[SubscribeReasonCode]) {
        let filter = lock(&context.awaiting_suback)
            .pop_front()
            .unwrap_or_else(|| format!("packet {packet_id}"));

        if refused.is_empty() {
            debug!(target: "mqtt_transport", topic = %filter, packet_id, "Subscription granted");
        } else {
            error!(topic = %filter, packet_id, reasons = ?refused, "Broker refused subscription");
        }

        context.tally_tx.send_modify(|tally| {
            tally.acked += 1;
            if !refused.is_empty() {
                tally.refused.push(filter);
            }
        });
    }

    /// Hand an inbound publish to the dispatch channel without waiting.
    /// A full channel drops the message so the event loop keeps draining
    /// outgoing requests.
    fn forward_message(context: &EventLoopContext, topic: String, payload: Vec<u8>) {
        debug!(target: "mqtt_transport", topic = %topic, bytes = payload.len(), "Received message");

        let sender = lock(&context.message_sender).clone();
        let Some(sender) = sender else {
            warn!(topic = %topic, "No message sender configured, inbound message dropped");
            return;
        };

        match sender.try_send(InboundMessage::new(topic, payload)) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "Dispatch queue full, inbound message dropped");
            }
            Err(TrySendError::Closed(message)) => {
                error!(topic = %message.topic, "Dispatch queue closed, inbound message dropped");
            }
        }
    }

    /// Re-issue tracked subscriptions after the broker lost our session
    async fn resubscribe_to_topics(context: &EventLoopContext) {
        let topics = lock(&context.subscribed_topics).clone();
        for topic in topics {
            lock(&context.awaiting_suback).push_back(topic.clone());
            if let Err(e) = context.client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                lock(&context.awaiting_suback).pop_back();
                error!(topic = %topic, "Failed to re-subscribe: {}", e);
            } else {
                debug!(target: "mqtt_transport", topic = %topic, "Re-subscribed");
            }
        }
    }

    /// Sleep for `delay` unless shutdown is signalled first.
    /// Returns true if the full delay elapsed.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Shutdown signal received during reconnection delay, stopping");
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Apply the retry plan after the session dropped. rumqttc reconnects on
    /// the next poll, so retrying only means waiting out the backoff.
    async fn wait_before_retry(
        context: &EventLoopContext,
        retries: &mut u32,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        let shutting_down = *shutdown_rx.borrow();
        match session::plan_retry(*retries, &context.reconnect_config, shutting_down) {
            RetryPlan::Wait { attempt, delay } => {
                *retries = attempt;
                context.enter(SessionEvent::RetryScheduled(attempt));
                info!(
                    device_id = %context.device_id,
                    attempt,
                    max_attempts = ?context.reconnect_config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting after backoff"
                );
                Self::interruptible_sleep(shutdown_rx.clone(), delay).await
            }
            RetryPlan::Stop => {
                info!("Shutdown signal received, not reconnecting");
                false
            }
            RetryPlan::GiveUp { attempts } => {
                context.enter(SessionEvent::GaveUp(format!(
                    "No session after {attempts} reconnection attempts"
                )));
                false
            }
        }
    }

    fn signal_shutdown(&self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
    }

    /// Disconnect from the broker. Messages queued before this call are
    /// flushed ahead of the DISCONNECT packet.
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let Some(state_rx) = &self.state_rx else {
            info!("MQTT client was never connected, nothing to disconnect");
            return Ok(());
        };

        let connected = state_rx.borrow().accepts_traffic();
        if connected {
            self.client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        } else {
            self.signal_shutdown();
        }

        let handle = lock(&self.event_loop_handle).take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
            }
        }

        self.signal_shutdown();
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("Client disconnected".to_string()));

        info!(device_id = %self.device_id, "MQTT client disconnected");
        Ok(())
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Fail unless the session is established
    fn ensure_session(&self) -> Result<(), MqttError> {
        let state = self.connection_state().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        if !state.accepts_traffic() {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), MqttError> {
        self.ensure_session()?;

        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", topic = %topic, qos = ?qos, "Published message");
        Ok(())
    }

    /// Subscribe to `topic`. The topic is remembered so it can be restored
    /// if the broker drops the session.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.ensure_session()?;

        info!(topic = %topic, "Subscribing");
        lock(&self.awaiting_suback).push_back(topic.to_string());

        if let Err(e) = self.client.subscribe(topic, qos).await {
            lock(&self.awaiting_suback).pop_back();
            return Err(MqttError::SubscriptionFailed(
                format!("Failed to subscribe to {topic}: {e}").into(),
            ));
        }

        {
            let mut topics = lock(&self.subscribed_topics);
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        self.subscribe_requests.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Wait until the broker has answered every subscription requested so
    /// far. False on timeout or when any of them was refused.
    pub async fn wait_for_subscriptions(&self, timeout: Duration) -> bool {
        let expected = self.subscribe_requests.load(Ordering::SeqCst);
        let mut tally_rx = self.tally_tx.subscribe();

        let answered =
            tokio::time::timeout(timeout, tally_rx.wait_for(|tally| tally.acked >= expected)).await;
        match answered {
            Ok(Ok(tally)) => tally.refused.is_empty(),
            _ => false,
        }
    }

    pub fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *lock(&self.message_sender) = Some(sender);
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, qos).await
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic, qos).await
    }

    async fn wait_for_subscriptions(&self, timeout: Duration) -> bool {
        MqttClient::wait_for_subscriptions(self, timeout).await
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        MqttClient::set_message_sender(self, sender)
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.signal_shutdown();

        if let Some(handle) = lock(&self.event_loop_handle).take() {
            handle.abort();
        }
    }
}
