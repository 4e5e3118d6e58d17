/// Vehicle state and its per-tick integration
///
/// A first-order, rate-limited approach to target. Not a dynamics model:
/// each axis moves a fixed fraction of the remaining error per second,
/// capped at a maximum rate, and stops once it is close enough.
use serde::{Deserialize, Serialize};

use crate::config::SimulatorConfig;

const ALTITUDE_REACHED_M: f64 = 1.0;
const ALTITUDE_TIME_CONSTANT: f64 = 10.0; // rate = diff / 10
const MAX_CLIMB_RATE: f64 = 10.0; // m/s

const SPEED_REACHED_MS: f64 = 0.1;
const SPEED_TIME_CONSTANT: f64 = 5.0; // accel = diff / 5
const MAX_ACCELERATION: f64 = 2.0; // m/s²

const DEG_PER_MS: f64 = 0.00001; // rough m/s → degrees of lat/lon per tick

const ACCEL_DRAIN: f64 = 0.01; // %/s per m/s² of acceleration
const CLIMB_DRAIN: f64 = 0.005; // %/s per m/s of climb or descent

/// Normalize any finite angle into [0, 360)
pub fn normalize_heading(degrees: f64) -> f64 {
    let heading = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if heading >= 360.0 {
        0.0
    } else {
        heading
    }
}

/// Fields are read through the accessors; only the setters and `advance()`
/// change them, so the ranges below hold after every call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub(crate) altitude: f64,      // m, >= 0
    pub(crate) speed: f64,         // m/s, >= 0
    pub(crate) heading: f64,       // degrees from north, [0, 360)
    pub(crate) battery_level: f64, // percent, [0, 100]
    pub(crate) latitude: f64,
    pub(crate) longitude: f64,

    pub(crate) target_altitude: Option<f64>,
    pub(crate) target_speed: Option<f64>,

    // Derived each tick
    pub(crate) altitude_change_rate: f64, // m/s
    pub(crate) acceleration: f64,         // m/s²
}

impl VehicleState {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            altitude: config.initial_altitude.max(0.0),
            speed: config.initial_speed.max(0.0),
            heading: 0.0,
            battery_level: config.initial_battery.clamp(0.0, 100.0),
            latitude: config.initial_latitude,
            longitude: config.initial_longitude,
            target_altitude: None,
            target_speed: None,
            altitude_change_rate: 0.0,
            acceleration: 0.0,
        }
    }

    /// Store a new altitude target (floored at 0). Returns the stored value,
    /// or None if the input was not a finite number.
    pub fn set_target_altitude(&mut self, altitude: f64) -> Option<f64> {
        if !altitude.is_finite() {
            return None;
        }
        let target = altitude.max(0.0);
        self.target_altitude = Some(target);
        Some(target)
    }

    pub fn set_target_speed(&mut self, speed: f64) -> Option<f64> {
        if !speed.is_finite() {
            return None;
        }
        let target = speed.max(0.0);
        self.target_speed = Some(target);
        Some(target)
    }

    /// Heading changes take effect immediately; there is no turn rate.
    pub fn set_heading(&mut self, heading: f64) -> Option<f64> {
        if !heading.is_finite() {
            return None;
        }
        self.heading = normalize_heading(heading);
        Some(self.heading)
    }

    /// Advance the state by one tick of `dt` seconds.
    pub fn advance(&mut self, dt: f64, base_drain_rate: f64) {
        self.update_altitude(dt);
        self.update_speed(dt);
        self.update_position();
        self.update_battery(dt, base_drain_rate);
    }

    fn update_altitude(&mut self, dt: f64) {
        match self.target_altitude {
            Some(target) => {
                let diff = target - self.altitude;
                if diff.abs() < ALTITUDE_REACHED_M {
                    self.target_altitude = None;
                    self.altitude_change_rate = 0.0;
                } else {
                    self.altitude_change_rate =
                        (diff / ALTITUDE_TIME_CONSTANT).clamp(-MAX_CLIMB_RATE, MAX_CLIMB_RATE);
                    self.altitude += limit_step(self.altitude_change_rate * dt, diff);
                }
            }
            None => self.altitude_change_rate = 0.0,
        }
        self.altitude = self.altitude.max(0.0);
    }

    fn update_speed(&mut self, dt: f64) {
        match self.target_speed {
            Some(target) => {
                let diff = target - self.speed;
                if diff.abs() < SPEED_REACHED_MS {
                    self.target_speed = None;
                    self.acceleration = 0.0;
                } else {
                    self.acceleration =
                        (diff / SPEED_TIME_CONSTANT).clamp(-MAX_ACCELERATION, MAX_ACCELERATION);
                    self.speed += limit_step(self.acceleration * dt, diff);
                }
            }
            None => self.acceleration = 0.0,
        }
        self.speed = self.speed.max(0.0);
    }

    fn update_position(&mut self) {
        if self.speed <= 0.0 {
            return;
        }
        let displacement = self.speed * DEG_PER_MS;
        let heading_rad = self.heading.to_radians();
        self.latitude += displacement * heading_rad.cos();
        self.longitude += displacement * heading_rad.sin();
    }

    fn update_battery(&mut self, dt: f64, base_drain_rate: f64) {
        let drain = base_drain_rate
            - self.acceleration.abs() * ACCEL_DRAIN
            - self.altitude_change_rate.abs() * CLIMB_DRAIN;

        self.battery_level = (self.battery_level + drain * dt).clamp(0.0, 100.0);
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn battery_level(&self) -> f64 {
        self.battery_level
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn target_altitude(&self) -> Option<f64> {
        self.target_altitude
    }

    pub fn target_speed(&self) -> Option<f64> {
        self.target_speed
    }

    /// Climb (+) or descent (-) rate applied on the last tick
    pub fn altitude_change_rate(&self) -> f64 {
        self.altitude_change_rate
    }

    /// Speed change rate applied on the last tick
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Safe to leave emergency mode: on (or within a metre of) the ground and stopped
    pub fn is_landed(&self) -> bool {
        self.altitude <= 1.0 && self.speed <= 0.1
    }
}

/// Never step past the target when a long tick would overshoot it
fn limit_step(step: f64, remaining: f64) -> f64 {
    if step.abs() > remaining.abs() {
        remaining
    } else {
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn state_at(altitude: f64, speed: f64) -> VehicleState {
        VehicleState::new(&SimulatorConfig {
            initial_altitude: altitude,
            initial_speed: speed,
            initial_latitude: 0.0,
            initial_longitude: 0.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_climb_first_tick() {
        // 100 m → 500 m: diff/10 = 40, capped at 10 m/s
        let mut state = state_at(100.0, 0.0);
        state.set_target_altitude(500.0);
        state.advance(0.1, -0.05);

        assert_abs_diff_eq!(state.altitude, 101.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.altitude_change_rate, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_altitude_converges_monotonically() {
        for &(start, target) in &[(100.0, 500.0), (300.0, 0.0), (0.0, 42.5), (80.0, 79.5)] {
            let mut state = state_at(start, 0.0);
            state.set_target_altitude(target);

            let dt = 0.5;
            let mut previous = state.altitude;
            for _ in 0..10_000 {
                state.advance(dt, -0.05);
                let delta = state.altitude - previous;
                assert!(delta.abs() <= 10.0 * dt + 1e-9);
                // Moving toward the target, never away from it
                assert!((target - state.altitude).abs() <= (target - previous).abs() + 1e-9);
                previous = state.altitude;
                if state.target_altitude.is_none() {
                    break;
                }
            }

            assert!(state.target_altitude.is_none(), "target {} never reached", target);
            assert!((state.altitude - target).abs() < 1.0);
        }
    }

    #[test]
    fn test_altitude_holds_after_reaching_target() {
        let mut state = state_at(100.0, 0.0);
        state.set_target_altitude(100.5);
        state.advance(1.0, -0.05);
        assert!(state.target_altitude.is_none());

        let held = state.altitude;
        for _ in 0..10 {
            state.advance(1.0, -0.05);
        }
        assert_eq!(state.altitude, held);
        assert_eq!(state.altitude_change_rate, 0.0);
    }

    #[test]
    fn test_speed_converges_with_rate_limit() {
        let mut state = state_at(100.0, 0.0);
        state.set_target_speed(50.0);

        let dt = 0.1;
        let mut previous = state.speed;
        for _ in 0..100_000 {
            state.advance(dt, -0.05);
            assert!((state.speed - previous).abs() <= 2.0 * dt + 1e-9);
            assert!(state.speed <= 50.0);
            previous = state.speed;
            if state.target_speed.is_none() {
                break;
            }
        }

        assert!(state.target_speed.is_none());
        assert!((state.speed - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_long_tick_does_not_overshoot() {
        let mut state = state_at(100.0, 0.0);
        state.set_target_altitude(105.0);
        state.advance(60.0, 0.0);
        assert_abs_diff_eq!(state.altitude, 105.0, epsilon = 1e-9);
    }

    #[test]
    fn test_targets_are_floored_at_zero() {
        let mut state = state_at(100.0, 10.0);
        assert_eq!(state.set_target_altitude(-50.0), Some(0.0));
        assert_eq!(state.set_target_speed(-3.0), Some(0.0));
        assert_eq!(state.target_altitude, Some(0.0));
        assert_eq!(state.target_speed, Some(0.0));

        // No state mutation until the next tick
        assert_eq!(state.altitude, 100.0);
        assert_eq!(state.speed, 10.0);
    }

    #[test]
    fn test_non_finite_inputs_rejected() {
        let mut state = state_at(100.0, 0.0);
        assert_eq!(state.set_target_altitude(f64::NAN), None);
        assert_eq!(state.set_target_speed(f64::INFINITY), None);
        assert_eq!(state.set_heading(f64::NEG_INFINITY), None);
        assert_eq!(state.target_altitude, None);
        assert_eq!(state.target_speed, None);
        assert_eq!(state.heading, 0.0);
    }

    #[test]
    fn test_heading_normalization() {
        assert_eq!(normalize_heading(-30.0), 330.0);
        assert_eq!(normalize_heading(725.0), 5.0);
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(0.0), 0.0);
        assert_eq!(normalize_heading(-1e-20), 0.0);

        for raw in [-1000.5, -360.0, -0.1, 45.0, 359.9, 1e6] {
            let heading = normalize_heading(raw);
            assert!((0.0..360.0).contains(&heading), "{} -> {}", raw, heading);
        }
    }

    #[test]
    fn test_position_follows_heading() {
        let mut state = state_at(100.0, 10.0);

        // Due north: only latitude moves
        state.advance(1.0, 0.0);
        assert!(state.latitude > 0.0);
        assert_abs_diff_eq!(state.longitude, 0.0, epsilon = 1e-12);

        // Due east: only longitude moves
        let lat = state.latitude;
        state.set_heading(90.0);
        state.advance(1.0, 0.0);
        assert_abs_diff_eq!(state.latitude, lat, epsilon = 1e-12);
        assert!(state.longitude > 0.0);
    }

    #[test]
    fn test_stationary_vehicle_does_not_move() {
        let mut state = state_at(100.0, 0.0);
        state.set_heading(123.0);
        state.advance(1.0, -0.05);
        assert_eq!(state.position(), (0.0, 0.0));
    }

    #[test]
    fn test_battery_drain() {
        let mut idle = state_at(100.0, 0.0);
        idle.advance(1.0, -0.05);
        assert_abs_diff_eq!(idle.battery_level, 99.95, epsilon = 1e-9);

        // Climbing and accelerating cost extra
        let mut busy = state_at(100.0, 0.0);
        busy.set_target_altitude(500.0);
        busy.set_target_speed(30.0);
        busy.advance(1.0, -0.05);
        // -0.05 - 2.0 * 0.01 - 10.0 * 0.005 = -0.12
        assert_abs_diff_eq!(busy.battery_level, 99.88, epsilon = 1e-9);
    }

    #[test]
    fn test_battery_stays_in_range() {
        let mut state = state_at(100.0, 0.0);
        state.set_target_altitude(10_000.0);
        state.set_target_speed(100.0);

        let mut previous = state.battery_level;
        for _ in 0..5_000 {
            state.advance(1.0, -0.05);
            assert!(state.battery_level <= previous);
            assert!((0.0..=100.0).contains(&state.battery_level));
            previous = state.battery_level;
        }
        assert_eq!(state.battery_level, 0.0);
    }

    #[test]
    fn test_initial_values_clamped() {
        let state = VehicleState::new(&SimulatorConfig {
            initial_altitude: -5.0,
            initial_speed: -1.0,
            initial_battery: 150.0,
            ..Default::default()
        });
        assert_eq!(state.altitude, 0.0);
        assert_eq!(state.speed, 0.0);
        assert_eq!(state.battery_level, 100.0);
    }

    #[test]
    fn test_accessors_report_derived_rates() {
        let mut state = state_at(100.0, 0.0);
        state.set_target_altitude(500.0);
        state.set_target_speed(30.0);
        state.advance(0.1, -0.05);

        assert_abs_diff_eq!(state.altitude_change_rate(), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.acceleration(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.altitude(), 101.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.speed(), 0.2, epsilon = 1e-9);
        assert_eq!(state.target_altitude(), Some(500.0));
        assert_eq!(state.target_speed(), Some(30.0));
        assert_eq!(state.heading(), 0.0);
        assert!(state.battery_level() < 100.0);

        // Rates drop back to zero once nothing is commanded
        let mut idle = state_at(100.0, 0.0);
        idle.advance(0.1, -0.05);
        assert_eq!(idle.altitude_change_rate(), 0.0);
        assert_eq!(idle.acceleration(), 0.0);
    }

    #[test]
    fn test_is_landed() {
        assert!(state_at(1.0, 0.1).is_landed());
        assert!(!state_at(1.5, 0.0).is_landed());
        assert!(!state_at(0.0, 0.5).is_landed());
    }
}
