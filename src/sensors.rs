use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::SensorReadings;

pub const TEMPERATURE: &str = "temperature";
pub const PRESSURE: &str = "pressure";
pub const HUMIDITY: &str = "humidity";
pub const VIBRATION: &str = "vibration";

const GROUND_TEMPERATURE_C: f64 = 25.0;
const LAPSE_RATE_C_PER_M: f64 = -0.0065; // standard atmosphere
const SEA_LEVEL_PRESSURE_KPA: f64 = 101.325;
const PRESSURE_SCALE_HEIGHT_M: f64 = 8400.0;
const HUMIDITY_BASELINE: f64 = 60.0; // percent
const VIBRATION_PER_MS: f64 = 0.1;

/// Multiplicative Gaussian noise: sigma = |value| * factor
pub struct NoiseSource {
    rng: StdRng,
    factor: f64,
}

impl NoiseSource {
    pub fn new(factor: f64, seed: Option<u64>) -> Self {
        let factor = if factor.is_finite() && factor >= 0.0 {
            factor
        } else {
            log::warn!("Invalid noise factor {}, disabling noise", factor);
            0.0
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        NoiseSource { rng, factor }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn add_noise(&mut self, value: f64) -> TelemetryResult<f64> {
        let sigma = value.abs() * self.factor;
        if sigma == 0.0 {
            return Ok(value);
        }
        let dist = Normal::new(0.0, sigma)
            .map_err(|e| TelemetryError::Noise(format!("sigma {}: {}", sigma, e)))?;
        Ok(value + dist.sample(&mut self.rng))
    }
}

/// Air temperature (°C) from a linear lapse rate
pub fn temperature_at(altitude: f64) -> f64 {
    GROUND_TEMPERATURE_C + altitude * LAPSE_RATE_C_PER_M
}

/// Barometric pressure (kPa), exponential atmosphere
pub fn pressure_at(altitude: f64) -> f64 {
    SEA_LEVEL_PRESSURE_KPA * (-altitude / PRESSURE_SCALE_HEIGHT_M).exp()
}

/// Environmental readings derived from the vehicle state.
///
/// Temperature and pressure come from the true altitude; vibration follows
/// the speed that is actually reported, so it already carries noise.
pub fn synthesize_readings(
    altitude: f64,
    reported_speed: f64,
    noise: &mut NoiseSource,
) -> TelemetryResult<SensorReadings> {
    let temperature = noise.add_noise(temperature_at(altitude))?;
    let pressure = noise.add_noise(pressure_at(altitude))?;
    let humidity = noise.add_noise(HUMIDITY_BASELINE)?.clamp(0.0, 100.0);
    let vibration = reported_speed.max(0.0) * VIBRATION_PER_MS;

    let mut readings = SensorReadings::new();
    readings.insert(TEMPERATURE.to_string(), temperature);
    readings.insert(PRESSURE.to_string(), pressure);
    readings.insert(HUMIDITY.to_string(), humidity);
    readings.insert(VIBRATION.to_string(), vibration);
    Ok(readings)
}
