//! Periodic telemetry publishing
//!
//! Each cycle samples the sensor, publishes one reading and reports
//! `status: connected`. The sleep after a cycle is read from
//! [`DeviceConfig`](crate::shadow::DeviceConfig) right before sleeping, so
//! an interval change lands at the next boundary and never cuts a sleep short.

use super::SensorSource;
use crate::config::AgentConfig;
use crate::protocol::{ConnectionStatus, TelemetryReading};
use crate::shadow::ShadowReconciler;
use crate::telemetry_span;
use crate::transport::{QoS, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, Instrument};

/// Identity stamped on every reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub owner_id: String,
    pub measurement: String,
    pub unit: String,
}

impl TelemetrySettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            owner_id: config.device.owner_id.clone(),
            measurement: config.telemetry.measurement.clone(),
            unit: config.telemetry.unit.clone(),
        }
    }
}

pub struct TelemetryLoop<T: Transport, S: SensorSource> {
    transport: Arc<T>,
    reconciler: Arc<ShadowReconciler<T>>,
    sensor: S,
    settings: TelemetrySettings,
}

impl<T: Transport + 'static, S: SensorSource> TelemetryLoop<T, S> {
    pub fn new(
        transport: Arc<T>,
        reconciler: Arc<ShadowReconciler<T>>,
        sensor: S,
        settings: TelemetrySettings,
    ) -> Self {
        Self {
            transport,
            reconciler,
            sensor,
            settings,
        }
    }

    /// Run until `shutdown_rx` turns true or its sender is dropped.
    /// Returns the number of completed cycles.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> u64 {
        let mut cycles = 0u64;
        info!(
            topic = %self.reconciler.topics().telemetry,
            interval_secs = self.reconciler.device_config().telemetry_interval_secs(),
            "Telemetry loop started"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            cycles += 1;
            self.run_cycle()
                .instrument(telemetry_span!(cycle = cycles))
                .await;

            let interval = self.reconciler.device_config().telemetry_interval();
            debug!(interval_secs = interval.as_secs(), "Sleeping until next telemetry cycle");
            if !sleep_unless_shutdown(&mut shutdown_rx, interval).await {
                break;
            }
        }

        info!(cycles, "Telemetry loop stopped");
        cycles
    }

    /// One sample, one telemetry publish, one status report.
    /// Failures are logged; the next cycle still runs.
    pub async fn run_cycle(&self) {
        let reading = TelemetryReading {
            owner_id: self.settings.owner_id.clone(),
            measurement: self.settings.measurement.clone(),
            value: self.sensor.sample(),
            unit: self.settings.unit.clone(),
        };

        self.publish_reading(&reading).await;

        if let Err(e) = self.reconciler.report_status(ConnectionStatus::Connected).await {
            error!("Failed to report connected status: {}", e);
        }
    }

    async fn publish_reading(&self, reading: &TelemetryReading) {
        let topic = &self.reconciler.topics().telemetry;
        let payload = match serde_json::to_vec(&reading.to_payload()) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize telemetry reading: {}", e);
                return;
            }
        };

        match self.transport.publish(topic, payload, QoS::AtLeastOnce).await {
            Ok(()) => info!(
                topic = %topic,
                value = reading.value,
                unit = %reading.unit,
                "Published telemetry"
            ),
            Err(e) => error!(topic = %topic, "Failed to publish telemetry: {}", e),
        }
    }
}

/// Sleep for `interval`; returns false if shutdown arrived first
async fn sleep_unless_shutdown(
    shutdown_rx: &mut watch::Receiver<bool>,
    interval: Duration,
) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return false;
                }
            }
        }
    }
}
