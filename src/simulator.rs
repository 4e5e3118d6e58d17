// simulator.rs — State engine
//
// Owns the vehicle state and the telemetry history. Setters may be called
// from any task (dashboard, sequencer, tests); the periodic driver calls
// `tick()` once per update interval. No lock is ever held across an await.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::SimulatorConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::history::History;
use crate::sensors::{self, NoiseSource};
use crate::state::VehicleState;
use crate::types::{SensorReadings, TelemetrySnapshot};

struct Engine {
    state: VehicleState,
    noise: NoiseSource,
}

/// Synthetic telemetry source for one vehicle.
///
/// Shared as `Arc<TelemetrySimulator>`; every method takes `&self`.
pub struct TelemetrySimulator {
    config: SimulatorConfig,
    engine: Mutex<Engine>,
    history: RwLock<History>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    tick_count: AtomicU64,
    failed_ticks: AtomicU64,
}

impl TelemetrySimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let state = VehicleState::new(&config);
        let noise = NoiseSource::new(config.noise_factor, config.seed);
        let (shutdown, _) = watch::channel(false);

        log::info!(
            "Telemetry simulator initialized: altitude={:.1}m speed={:.1}m/s battery={:.1}% position=({:.4}, {:.4})",
            state.altitude,
            state.speed,
            state.battery_level,
            state.latitude,
            state.longitude
        );

        TelemetrySimulator {
            history: RwLock::new(History::new(config.history_capacity)),
            engine: Mutex::new(Engine { state, noise }),
            config,
            running: AtomicBool::new(false),
            shutdown,
            tick_count: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
        }
    }

    // A panic mid-tick leaves the state usable; the next tick overwrites it.
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> RwLockReadGuard<'_, History> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Setters ──

    pub fn set_target_altitude(&self, altitude: f64) {
        match self.engine().state.set_target_altitude(altitude) {
            Some(target) => log::info!("New target altitude set: {:.1} meters", target),
            None => log::warn!("Ignoring non-finite target altitude {}", altitude),
        }
    }

    pub fn set_target_speed(&self, speed: f64) {
        match self.engine().state.set_target_speed(speed) {
            Some(target) => log::info!("New target speed set: {:.1} m/s", target),
            None => log::warn!("Ignoring non-finite target speed {}", speed),
        }
    }

    pub fn set_heading(&self, heading: f64) {
        match self.engine().state.set_heading(heading) {
            Some(normalized) => log::info!("New heading set: {:.1} degrees", normalized),
            None => log::warn!("Ignoring non-finite heading {}", heading),
        }
    }

    // ── Tick ──

    /// Advance the simulation by one update interval and record a snapshot.
    ///
    /// On error the vehicle state has still moved on, but nothing is
    /// appended to the history.
    pub fn tick(&self) -> TelemetryResult<TelemetrySnapshot> {
        let snapshot = {
            let mut engine = self.engine();
            let Engine { state, noise } = &mut *engine;

            state.advance(self.config.update_interval, self.config.battery_drain_rate);

            // Noise goes on the reported values only, never back into the state
            let altitude = noise.add_noise(state.altitude)?.max(0.0);
            let speed = noise.add_noise(state.speed)?.max(0.0);
            let sensor_readings = sensors::synthesize_readings(state.altitude, speed, noise)?;

            TelemetrySnapshot {
                timestamp: Utc::now(),
                altitude,
                speed,
                battery_level: state.battery_level,
                latitude: state.latitude,
                longitude: state.longitude,
                sensor_readings,
            }
        };

        if let Some(reason) = snapshot.invalid_reason() {
            return Err(TelemetryError::InvalidSnapshot(reason));
        }

        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "Generated telemetry: altitude={:.1} speed={:.1} battery={:.2}",
            snapshot.altitude,
            snapshot.speed,
            snapshot.battery_level
        );
        Ok(snapshot)
    }

    /// Fresh sensor readings for the current state, without ticking.
    ///
    /// Draws from the same noise stream as `tick()`.
    pub fn sensor_readings(&self) -> TelemetryResult<SensorReadings> {
        let mut engine = self.engine();
        let Engine { state, noise } = &mut *engine;
        let speed = noise.add_noise(state.speed)?.max(0.0);
        sensors::synthesize_readings(state.altitude, speed, noise)
    }

    // ── Lifecycle ──

    /// Periodic driver: one tick per update interval until `stop()`.
    ///
    /// A stop requested before the driver starts makes it return at once.
    pub async fn run(&self) {
        // One driver per simulator
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Telemetry simulation already running");
            return;
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "Starting telemetry simulation ({:.2}s interval)",
            self.config.update_interval
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
                        log::error!("Error in simulation loop: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown.send_replace(false);
        self.running.store(false, Ordering::SeqCst);
        log::info!(
            "Telemetry simulation stopped ({} snapshots, {} failed ticks)",
            self.tick_count(),
            self.failed_tick_count()
        );
    }

    pub fn stop(&self) {
        log::info!("Stopping telemetry simulation");
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Read-only accessors ──

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.engine().state.clone()
    }

    pub fn altitude(&self) -> f64 {
        self.engine().state.altitude
    }

    pub fn speed(&self) -> f64 {
        self.engine().state.speed
    }

    pub fn heading(&self) -> f64 {
        self.engine().state.heading
    }

    pub fn battery_level(&self) -> f64 {
        self.engine().state.battery_level
    }

    pub fn position(&self) -> (f64, f64) {
        self.engine().state.position()
    }

    pub fn target_altitude(&self) -> Option<f64> {
        self.engine().state.target_altitude
    }

    pub fn target_speed(&self) -> Option<f64> {
        self.engine().state.target_speed
    }

    /// Most recent `n` snapshots, oldest first
    pub fn recent(&self, n: usize) -> Vec<TelemetrySnapshot> {
        self.history().recent(n)
    }

    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.history().latest().cloned()
    }

    pub fn history_len(&self) -> usize {
        self.history().len()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn failed_tick_count(&self) -> u64 {
        self.failed_ticks.load(Ordering::Relaxed)
    }
}

impl Default for TelemetrySimulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}
