//! Sensor sampling and the periodic telemetry task

pub mod sensor;
pub mod telemetry_loop;

pub use sensor::{SensorSource, SimulatedPressureSensor};
pub use telemetry_loop::{TelemetryLoop, TelemetrySettings};
