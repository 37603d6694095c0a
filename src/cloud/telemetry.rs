//! Telemetry interval and sensor payloads

use crate::peripherals::SensorReadings;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Shortest accepted telemetry interval
pub const MIN_INTERVAL_MS: u64 = 3_000;
/// Longest accepted telemetry interval
pub const MAX_INTERVAL_MS: u64 = 600_000;
/// Interval used until the cloud sets one
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Error, PartialEq)]
#[error("Telemetry interval {0} ms outside [{MIN_INTERVAL_MS}, {MAX_INTERVAL_MS}]")]
pub struct IntervalOutOfRange(pub u64);

/// Time between two telemetry publishes
///
/// Out of range writes are rejected and leave the value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryInterval {
    millis: u64,
}

impl Default for TelemetryInterval {
    fn default() -> Self {
        Self {
            millis: DEFAULT_INTERVAL_MS,
        }
    }
}

impl TelemetryInterval {
    pub fn new(millis: u64) -> Result<Self, IntervalOutOfRange> {
        let mut interval = Self::default();
        interval.try_set_millis(millis)?;
        Ok(interval)
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Whole seconds, the unit Azure twin properties use
    pub fn as_secs(&self) -> u64 {
        self.millis / 1000
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.millis)
    }

    pub fn try_set_millis(&mut self, millis: u64) -> Result<(), IntervalOutOfRange> {
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&millis) {
            return Err(IntervalOutOfRange(millis));
        }
        self.millis = millis;
        Ok(())
    }

    pub fn try_set_secs(&mut self, secs: u64) -> Result<(), IntervalOutOfRange> {
        self.try_set_millis(secs.saturating_mul(1000))
    }
}

/// Standard telemetry document; absent sensors are left out
pub fn readings_to_json(readings: &SensorReadings) -> Value {
    let mut document = Map::new();
    if let Some(pressure) = readings.pressure {
        document.insert("pressure".to_string(), json!(pressure));
    }
    if let Some(humidity) = readings.humidity {
        document.insert("humidity".to_string(), json!(humidity));
    }
    if let Some(temperature) = readings.temperature {
        document.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(acceleration) = readings.acceleration {
        document.insert(
            "acceleration".to_string(),
            json!({ "x": acceleration.x, "y": acceleration.y, "z": acceleration.z }),
        );
    }
    Value::Object(document)
}
