use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::TelemetrySnapshot;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Flight statistics over a run of snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSummary {
    pub sample_count: usize,
    pub duration_seconds: f64,
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub peak_speed_ms: f64,
    pub peak_speed_kmh: f64,
    pub battery_used: f64,
    pub distance_meters: f64,
    pub sensor_means: BTreeMap<String, f64>,
}

impl FlightSummary {
    /// `None` for an empty run. Snapshots must be oldest first.
    pub fn from_snapshots(snapshots: &[TelemetrySnapshot]) -> Option<Self> {
        let first = snapshots.first()?;
        let last = snapshots.last()?;

        let mut min_altitude = f64::INFINITY;
        let mut max_altitude = f64::NEG_INFINITY;
        let mut peak_speed: f64 = 0.0;
        let mut distance = 0.0;
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for (i, snapshot) in snapshots.iter().enumerate() {
            min_altitude = min_altitude.min(snapshot.altitude);
            max_altitude = max_altitude.max(snapshot.altitude);
            peak_speed = peak_speed.max(snapshot.speed);

            if i > 0 {
                let prev = &snapshots[i - 1];
                distance += haversine_distance(
                    prev.latitude,
                    prev.longitude,
                    snapshot.latitude,
                    snapshot.longitude,
                );
            }

            for (name, value) in &snapshot.sensor_readings {
                let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        let sensor_means = sums
            .into_iter()
            .map(|(name, (sum, count))| (name, sum / count as f64))
            .collect();

        let duration = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;

        Some(FlightSummary {
            sample_count: snapshots.len(),
            duration_seconds: duration.max(0.0),
            min_altitude,
            max_altitude,
            peak_speed_ms: peak_speed,
            peak_speed_kmh: peak_speed * 3.6,
            battery_used: (first.battery_level - last.battery_level).max(0.0),
            distance_meters: distance,
            sensor_means,
        })
    }
}

impl fmt::Display for FlightSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Samples:      {}", self.sample_count)?;
        writeln!(f, "Duration:     {:.1} s", self.duration_seconds)?;
        writeln!(
            f,
            "Altitude:     {:.1} - {:.1} m",
            self.min_altitude, self.max_altitude
        )?;
        writeln!(
            f,
            "Peak speed:   {:.1} m/s ({:.1} km/h)",
            self.peak_speed_ms, self.peak_speed_kmh
        )?;
        writeln!(f, "Battery used: {:.2}%", self.battery_used)?;
        write!(f, "Distance:     {:.1} m", self.distance_meters)?;
        for (name, mean) in &self.sensor_means {
            write!(f, "\nMean {}: {:.2}", name, mean)?;
        }
        Ok(())
    }
}
