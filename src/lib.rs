//! Shadow Agent
//!
//! A connected-device agent that keeps a persistent MQTT session with a cloud
//! broker, publishes sensor telemetry on a schedule and keeps its device
//! shadow in sync with the one setting the cloud may change: the telemetry
//! interval.
//!
//! # Overview
//!
//! - [`transport`] - MQTT session behind the [`transport::Transport`] trait
//! - [`router`] - exact-topic dispatch of inbound shadow messages
//! - [`shadow`] - local device config and the delta/get/update protocol
//! - [`telemetry`] - sensor sampling and the periodic publish task
//! - [`agent`] - startup ordering and graceful shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use shadow_agent::shadow::{evaluate_delta, DeltaDecision, DeviceConfig};
//!
//! let config = DeviceConfig::new(10).unwrap();
//! let delta = json!({"state": {"telemetryIntervalSeconds": 5}});
//!
//! if let DeltaDecision::Apply(seconds) = evaluate_delta(&delta) {
//!     config.set_telemetry_interval_secs(seconds).unwrap();
//! }
//! assert_eq!(config.telemetry_interval_secs(), 5);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod router;
pub mod shadow;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use agent::{AgentSupervisor, LifecycleError};
pub use config::*;
pub use error::{AgentError, AgentResult};
pub use protocol::*;
pub use router::{DispatchOutcome, MessageRouter, Route, RouterError};
pub use shadow::{DeltaDecision, DeviceConfig, IntervalRejection, ShadowReconciler};
pub use telemetry::{SensorSource, SimulatedPressureSensor, TelemetryLoop};
pub use transport::mqtt::MqttClient;
