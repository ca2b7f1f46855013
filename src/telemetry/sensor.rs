//! Sensor sources sampled by the telemetry loop

use std::time::{SystemTime, UNIX_EPOCH};

/// Anything that can produce one numeric reading on demand
pub trait SensorSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Pressure sensor stand-in: a slow sine wave around 1000 PSI
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedPressureSensor;

impl SimulatedPressureSensor {
    pub fn new() -> Self {
        Self
    }

    /// Reading at `seconds` since the Unix epoch, rounded to two decimals
    pub fn pressure_at(seconds: f64) -> f64 {
        let raw = 1000.0 + 500.0 * (seconds / 10.0).sin();
        (raw * 100.0).round() / 100.0
    }
}

impl SensorSource for SimulatedPressureSensor {
    fn sample(&self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default();
        Self::pressure_at(now)
    }
}
