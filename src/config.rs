// config.rs — Tunables for the state engine and the command sequencer
//
// Every field has a default so a partial JSON file only needs to name the
// values it changes. The CLI layers its flags on top of whatever was loaded.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ─── State engine ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    // ── Timing ──
    /// Seconds of simulated time per tick (also the wall-clock tick period)
    pub update_interval: f64,

    // ── Noise ──
    /// Gaussian noise sigma as a fraction of the value (0.1 = 10%)
    pub noise_factor: f64,
    /// Fixed RNG seed for reproducible runs. None = seeded from entropy.
    pub seed: Option<u64>,

    // ── Initial conditions ──
    pub initial_altitude: f64,
    pub initial_speed: f64,
    pub initial_battery: f64,
    pub initial_latitude: f64,
    pub initial_longitude: f64,

    // ── Battery model ──
    /// Baseline drain in percent per second (negative = discharging)
    pub battery_drain_rate: f64,

    // ── History ──
    pub history_capacity: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            update_interval: 1.0,
            noise_factor: 0.1,
            seed: None,
            initial_altitude: 100.0,
            initial_speed: 0.0,
            initial_battery: 100.0,
            initial_latitude: 37.7749, // San Francisco
            initial_longitude: -122.4194,
            battery_drain_rate: -0.05,
            history_capacity: 1000,
        }
    }
}

/// `secs` as a Duration, at least `min`; values too large to represent
/// (including infinity) fall back to `fallback`.
fn secs_or(secs: f64, min: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(min)).unwrap_or_else(|_| {
        log::warn!("Duration of {}s is out of range, using {}s", secs, fallback);
        Duration::from_secs_f64(fallback)
    })
}

impl SimulatorConfig {
    pub fn tick_period(&self) -> Duration {
        secs_or(self.update_interval, 0.001, 1.0)
    }
}

// ─── Command sequencer ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Bounded wait for the next command before re-checking the stop signal
    pub poll_timeout_secs: f64,
    /// Pause between zeroing speed and zeroing altitude on emergency stop
    pub emergency_pause_secs: f64,
    /// Delay between the sub-commands of a takeoff/landing maneuver
    pub maneuver_step_secs: f64,
    /// Altitude used by `execute_takeoff_sequence` callers that have no preference
    pub default_takeoff_altitude: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 0.5,
            emergency_pause_secs: 0.1,
            maneuver_step_secs: 1.0,
            default_takeoff_altitude: 300.0,
        }
    }
}

impl ControlConfig {
    pub fn poll_timeout(&self) -> Duration {
        secs_or(self.poll_timeout_secs, 0.0, 0.5)
    }

    pub fn emergency_pause(&self) -> Duration {
        secs_or(self.emergency_pause_secs, 0.0, 0.1)
    }

    pub fn maneuver_step(&self) -> Duration {
        secs_or(self.maneuver_step_secs, 0.0, 1.0)
    }
}

// ─── Whole application ───────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulator: SimulatorConfig,
    pub control: ControlConfig,
}

impl AppConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }
}
