// flight_plan.rs — Scripted command sequences
//
// A plan is a list of (delay, label, command) steps. Each delay is measured
// from the previous step, and every command goes through the sequencer so
// the emergency latch still applies.

use std::time::Duration;
use tokio::time::sleep;

use crate::control::{ControlCommand, VehicleControlSystem};
use crate::error::TelemetryResult;

#[derive(Debug, Clone, PartialEq)]
pub struct FlightStep {
    pub delay: Duration,
    pub label: String,
    pub command: ControlCommand,
}

impl FlightStep {
    pub fn new(delay_secs: f64, label: impl Into<String>, command: ControlCommand) -> Self {
        FlightStep {
            // NaN and negatives mean "now"; anything too long to represent saturates
            delay: Duration::try_from_secs_f64(delay_secs.max(0.0)).unwrap_or(Duration::MAX),
            label: label.into(),
            command,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlan {
    pub name: String,
    /// Suggested starting position (lat, lon)
    pub origin: Option<(f64, f64)>,
    pub steps: Vec<FlightStep>,
}

impl FlightPlan {
    pub fn new(name: impl Into<String>) -> Self {
        FlightPlan {
            name: name.into(),
            origin: None,
            steps: Vec::new(),
        }
    }

    pub fn with_origin(mut self, latitude: f64, longitude: f64) -> Self {
        self.origin = Some((latitude, longitude));
        self
    }

    pub fn step(mut self, delay_secs: f64, label: impl Into<String>, command: ControlCommand) -> Self {
        self.steps.push(FlightStep::new(delay_secs, label, command));
        self
    }

    /// Climb, cruise, turn, descend, stop.
    pub fn basic() -> Self {
        FlightPlan::new("basic")
            .step(2.0, "Climbing to 500 meters", ControlCommand::new().with_altitude(500.0))
            .step(5.0, "Accelerating to 30 m/s", ControlCommand::new().with_speed(30.0))
            .step(5.0, "Turning to heading 45 degrees", ControlCommand::new().with_heading(45.0))
            .step(5.0, "Beginning descent", ControlCommand::new().with_altitude(100.0))
            .step(5.0, "Slowing down", ControlCommand::new().with_speed(0.0))
    }

    /// Sightseeing loop over San Diego
    pub fn tour() -> Self {
        let mut plan = FlightPlan::new("tour")
            .with_origin(32.7157, -117.1611)
            .step(
                2.0,
                "Taking off from downtown San Diego",
                ControlCommand::new().with_altitude(300.0).with_speed(20.0),
            )
            .step(5.0, "Flying to Balboa Park", ControlCommand::new().with_heading(45.0));

        for (i, heading) in (0..360).step_by(45).enumerate() {
            let delay = if i == 0 { 8.0 } else { 3.0 };
            plan = plan.step(
                delay,
                format!("Circling Balboa Park ({}°)", heading),
                ControlCommand::new().with_heading(heading as f64),
            );
        }

        plan.step(3.0, "Moving to the USS Midway", ControlCommand::new().with_heading(270.0))
            .step(
                6.0,
                "Flying over Coronado Bridge",
                ControlCommand::new().with_heading(225.0).with_altitude(200.0),
            )
            .step(
                8.0,
                "Heading to Point Loma",
                ControlCommand::new().with_heading(315.0).with_altitude(250.0),
            )
            .step(
                10.0,
                "Returning to downtown San Diego",
                ControlCommand::new().with_heading(90.0).with_speed(15.0),
            )
            .step(
                8.0,
                "Beginning final approach",
                ControlCommand::new().with_altitude(100.0).with_speed(5.0),
            )
            .step(5.0, "Landing", ControlCommand::new().with_altitude(0.0).with_speed(0.0))
    }

    /// Built-in plan by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(Self::basic()),
            "tour" => Some(Self::tour()),
            _ => None,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.steps
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.delay))
    }

    /// Send every step through `control`, waiting out each delay first.
    ///
    /// Stops at the first submission error (normally the sequencer stopping).
    pub async fn run(&self, control: &VehicleControlSystem) -> TelemetryResult<()> {
        log::info!("Running flight plan '{}' ({} steps)", self.name, self.steps.len());

        for step in &self.steps {
            sleep(step.delay).await;
            log::info!("[{}] {}", self.name, step.label);
            control.send_command(step.command.clone())?;
        }

        log::info!("Flight plan '{}' complete", self.name);
        Ok(())
    }
}
