//! Wire protocol for the device shadow and telemetry topics
//!
//! This module defines the topic layout for a single device and the JSON
//! bodies exchanged with the broker.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
