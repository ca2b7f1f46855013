//! Agent supervisor
//!
//! Startup order is fixed: connect, register the inbound channel, subscribe,
//! wait for the subscriptions to settle, request the current shadow and only
//! then start publishing telemetry. Shutdown stops the telemetry task first so
//! no reading follows the final `status: disconnected` report.

use crate::config::{AgentConfig, ConfigError};
use crate::lifecycle_span;
use crate::protocol::{ConnectionStatus, ShadowTopics};
use crate::router::MessageRouter;
use crate::shadow::{DeviceConfig, IntervalRejection, ShadowReconciler};
use crate::telemetry::{SensorSource, TelemetryLoop, TelemetrySettings};
use crate::transport::{QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Inbound messages buffered between the transport and the router
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Supervisor errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error")]
    ConfigurationError(#[from] ConfigError),
    #[error("Invalid default telemetry interval")]
    InvalidInterval(#[from] IntervalRejection),
    #[error("Transport error")]
    TransportError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Agent already started")]
    AlreadyStarted,
}

/// Tasks and shared handles that exist only while the agent runs
struct RunningAgent<T: Transport> {
    transport: Arc<T>,
    reconciler: Arc<ShadowReconciler<T>>,
    shutdown_tx: watch::Sender<bool>,
    router_handle: JoinHandle<u64>,
    telemetry_handle: JoinHandle<u64>,
}

pub struct AgentSupervisor<T, S>
where
    T: Transport + 'static,
    S: SensorSource + 'static,
{
    config: AgentConfig,
    transport: Option<T>,
    sensor: Option<S>,
    device_config: Arc<DeviceConfig>,
    running: Option<RunningAgent<T>>,
}

impl<T, S> AgentSupervisor<T, S>
where
    T: Transport + 'static,
    S: SensorSource + 'static,
{
    pub fn new(config: AgentConfig, transport: T, sensor: S) -> Result<Self, LifecycleError> {
        let device_config = Arc::new(DeviceConfig::new(config.telemetry.interval_secs)?);

        Ok(Self {
            config,
            transport: Some(transport),
            sensor: Some(sensor),
            device_config,
            running: None,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }

    pub fn device_config(&self) -> &Arc<DeviceConfig> {
        &self.device_config
    }

    /// The transport, before or after `start`
    pub fn transport(&self) -> Option<&T> {
        match &self.running {
            Some(running) => Some(running.transport.as_ref()),
            None => self.transport.as_ref(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Check if the transport connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        self.transport()
            .is_some_and(|transport| transport.is_permanently_disconnected())
    }

    /// Bring the agent up. Only a failed connect is fatal.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let span = lifecycle_span!(device_id = %self.config.device.id, phase = "start");
        self.start_inner().instrument(span).await
    }

    async fn start_inner(&mut self) -> Result<(), LifecycleError> {
        let (Some(mut transport), Some(sensor)) = (self.transport.take(), self.sensor.take())
        else {
            return Err(LifecycleError::AlreadyStarted);
        };

        info!("Starting shadow agent");
        transport
            .connect()
            .await
            .map_err(|e| LifecycleError::TransportError(Box::new(e)))?;
        info!("MQTT transport connected");

        let transport = Arc::new(transport);
        let topics = ShadowTopics::new(&self.config.device.id, &self.config.shadow.error_topic);
        let reconciler = Arc::new(ShadowReconciler::new(
            transport.clone(),
            topics.clone(),
            self.config.device.id.clone(),
            self.device_config.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        transport.set_message_sender(inbound_tx);
        let router = MessageRouter::new(reconciler.clone());
        let router_shutdown = shutdown_rx.clone();
        let router_handle =
            tokio::spawn(async move { router.run(inbound_rx, router_shutdown).await });

        Self::subscribe_all(transport.as_ref(), &topics).await;

        let settle = Duration::from_millis(self.config.shadow.subscription_timeout_ms);
        if !transport.wait_for_subscriptions(settle).await {
            warn!(
                timeout_ms = self.config.shadow.subscription_timeout_ms,
                "Not every subscription was granted in time, continuing"
            );
        }

        if let Err(e) = reconciler.request_current_shadow().await {
            error!("Failed to request current shadow: {}", e);
        }

        let telemetry = TelemetryLoop::new(
            transport.clone(),
            reconciler.clone(),
            sensor,
            TelemetrySettings::from_config(&self.config),
        );
        let telemetry_handle = tokio::spawn(async move { telemetry.run(shutdown_rx).await });

        self.running = Some(RunningAgent {
            transport,
            reconciler,
            shutdown_tx,
            router_handle,
            telemetry_handle,
        });

        info!(
            interval_secs = self.device_config.telemetry_interval_secs(),
            "Shadow agent started"
        );
        Ok(())
    }

    /// Subscribe to every shadow topic; a failed subscription is logged and skipped
    async fn subscribe_all(transport: &T, topics: &ShadowTopics) {
        for topic in topics.subscriptions() {
            match transport.subscribe(&topic, QoS::AtLeastOnce).await {
                Ok(()) => info!(topic = %topic, "Subscription requested"),
                Err(e) => error!(topic = %topic, "Failed to subscribe: {}", e),
            }
        }
    }

    /// Stop telemetry, report `disconnected`, then disconnect
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        let Some(running) = self.running.take() else {
            info!("Shadow agent not running, nothing to shut down");
            return Ok(());
        };

        let span = lifecycle_span!(device_id = %self.config.device.id, phase = "shutdown");
        async move {
            info!("Shutting down shadow agent");
            let _ = running.shutdown_tx.send(true);

            match running.telemetry_handle.await {
                Ok(cycles) => info!(cycles, "Telemetry task finished"),
                Err(e) => error!("Telemetry task ended abnormally: {}", e),
            }

            if let Err(e) = running
                .reconciler
                .report_status(ConnectionStatus::Disconnected)
                .await
            {
                error!("Failed to report disconnected status: {}", e);
            }

            let disconnect_result = running.transport.disconnect().await;

            if let Err(e) = running.router_handle.await {
                error!("Router task ended abnormally: {}", e);
            }

            disconnect_result.map_err(|e| LifecycleError::TransportError(Box::new(e)))?;
            info!("Shadow agent shutdown complete");
            Ok::<(), LifecycleError>(())
        }
        .instrument(span)
        .await
    }
}
