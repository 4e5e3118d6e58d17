//! Synthetic vehicle telemetry.
//!
//! A [`TelemetrySimulator`] moves a vehicle toward commanded altitude and
//! speed targets on a fixed tick, publishing noisy [`TelemetrySnapshot`]s into
//! a bounded history. A [`VehicleControlSystem`] feeds it commands in order,
//! runs takeoff/landing maneuvers and owns the emergency latch.

pub mod config;
pub mod control;
pub mod dashboard;
pub mod error;
pub mod flight_plan;
pub mod history;
pub mod live_status;
pub mod sensors;
pub mod simulator;
pub mod state;
pub mod summary;
pub mod types;

pub use config::{AppConfig, ControlConfig, SimulatorConfig};
pub use control::{ControlCommand, ControlMode, VehicleControlSystem};
pub use error::{TelemetryError, TelemetryResult};
pub use flight_plan::{FlightPlan, FlightStep};
pub use live_status::VehicleStatus;
pub use simulator::TelemetrySimulator;
pub use state::VehicleState;
pub use summary::FlightSummary;
pub use types::{SensorReadings, TelemetrySnapshot};
