//! The one piece of device configuration the cloud may change

use super::IntervalRejection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide device configuration
///
/// Written by the shadow reconciler from the dispatch task, read by the
/// telemetry loop before every sleep. The interval is always positive.
#[derive(Debug)]
pub struct DeviceConfig {
    telemetry_interval_secs: AtomicU64,
}

impl DeviceConfig {
    pub fn new(default_interval_secs: u64) -> Result<Self, IntervalRejection> {
        if default_interval_secs == 0 {
            return Err(IntervalRejection::NotPositive("0".to_string()));
        }

        Ok(Self {
            telemetry_interval_secs: AtomicU64::new(default_interval_secs),
        })
    }

    pub fn telemetry_interval_secs(&self) -> u64 {
        self.telemetry_interval_secs.load(Ordering::Acquire)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs())
    }

    /// Replace the interval, returning the previous value
    pub fn set_telemetry_interval_secs(&self, seconds: u64) -> Result<u64, IntervalRejection> {
        if seconds == 0 {
            return Err(IntervalRejection::NotPositive("0".to_string()));
        }

        Ok(self.telemetry_interval_secs.swap(seconds, Ordering::AcqRel))
    }
}
