use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::VehicleControlSystem;
use crate::simulator::TelemetrySimulator;
use crate::types::TelemetrySnapshot;

/// Point-in-time view of the whole system, as served to dashboards
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VehicleStatus {
    pub timestamp: DateTime<Utc>,
    // Current (true) state
    pub altitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub battery_level: f64,
    pub latitude: f64,
    pub longitude: f64,
    // Commanded
    pub target_altitude: Option<f64>,
    pub target_speed: Option<f64>,
    // Control
    pub emergency_mode: bool,
    pub simulator_running: bool,
    pub control_running: bool,
    pub active_maneuvers: usize,
    // History
    pub tick_count: u64,
    pub history_size: usize,
    pub latest: Option<TelemetrySnapshot>,
}

impl VehicleStatus {
    pub fn capture(simulator: &TelemetrySimulator, control: &VehicleControlSystem) -> Self {
        let state = simulator.vehicle_state();
        Self {
            timestamp: Utc::now(),
            altitude: state.altitude,
            speed: state.speed,
            heading: state.heading,
            battery_level: state.battery_level,
            latitude: state.latitude,
            longitude: state.longitude,
            target_altitude: state.target_altitude,
            target_speed: state.target_speed,
            emergency_mode: control.is_emergency_mode(),
            simulator_running: simulator.is_running(),
            control_running: control.is_running(),
            active_maneuvers: control.active_maneuvers(),
            tick_count: simulator.tick_count(),
            history_size: simulator.history_len(),
            latest: simulator.latest(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
