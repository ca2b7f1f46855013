//! Device shadow: local configuration and the protocol that keeps it in sync

pub mod delta;
pub mod device_config;
pub mod reconciler;

pub use delta::{delta_version, evaluate_delta, parse_interval, DeltaDecision};
pub use device_config::DeviceConfig;
pub use reconciler::ShadowReconciler;

use thiserror::Error;

/// Why a requested telemetry interval was refused
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntervalRejection {
    #[error("telemetry interval must be positive, got {0}")]
    NotPositive(String),
    #[error("telemetry interval must be an integer, got {0}")]
    NotAnInteger(String),
    #[error("telemetry interval must be a number, got {0}")]
    WrongType(String),
}
