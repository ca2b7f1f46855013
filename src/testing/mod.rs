//! Testing utilities and mock implementations
//!
//! Lets the shadow agent be exercised without an MQTT broker or real sensor.

pub mod mocks;

pub use mocks::*;
