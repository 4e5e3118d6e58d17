use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sensor name → reading. Ordered so JSON output is stable.
pub type SensorReadings = BTreeMap<String, f64>;

/// One immutable telemetry record, produced once per tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub altitude: f64,      // m
    pub speed: f64,         // m/s
    pub battery_level: f64, // percent
    pub latitude: f64,
    pub longitude: f64,
    pub sensor_readings: SensorReadings,
}

impl TelemetrySnapshot {
    /// True if every field is inside its physical range.
    ///
    /// Only looks at this snapshot; history plays no part.
    pub fn validate(&self) -> bool {
        self.invalid_reason().is_none()
    }

    /// First failed check, for log messages
    pub fn invalid_reason(&self) -> Option<String> {
        if !(self.altitude.is_finite() && self.altitude >= 0.0) {
            return Some(format!("altitude {} is not a finite value >= 0", self.altitude));
        }
        if !(self.speed.is_finite() && self.speed >= 0.0) {
            return Some(format!("speed {} is not a finite value >= 0", self.speed));
        }
        if !(0.0..=100.0).contains(&self.battery_level) {
            return Some(format!("battery {} outside 0-100", self.battery_level));
        }
        self.sensor_readings
            .iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(name, value)| format!("sensor {} is not numeric ({})", name, value))
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn sensor(&self, name: &str) -> Option<f64> {
        self.sensor_readings.get(name).copied()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
