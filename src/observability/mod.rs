//! Observability for the device agent
//!
//! Structured logging plus span macros for the shadow, telemetry, MQTT and
//! lifecycle paths.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span, shadow_span, telemetry_span};
