// control.rs — Command sequencer
//
// Any number of producers enqueue `ControlCommand`s; one consumer loop applies
// them to the simulator in arrival order. An emergency stop latches the
// sequencer into emergency mode, where every other command is dropped until
// `clear_emergency_mode()` finds the vehicle on the ground and stopped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::config::ControlConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::simulator::TelemetrySimulator;

// Maneuver set points
const TAKEOFF_CLIMB_ALTITUDE: f64 = 50.0;
const TAKEOFF_CLIMB_SPEED: f64 = 5.0;
const CRUISE_SPEED: f64 = 20.0;
const LANDING_SLOW_SPEED: f64 = 10.0;
const LANDING_APPROACH_SPEED: f64 = 5.0;

/// One control request. Any combination of fields may be set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCommand {
    pub target_altitude: Option<f64>,
    pub target_speed: Option<f64>,
    pub target_heading: Option<f64>,
    pub emergency_stop: bool,
}

impl ControlCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emergency() -> Self {
        Self {
            emergency_stop: true,
            ..Self::default()
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.target_altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.target_speed = Some(speed);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.target_heading = Some(heading);
        self
    }

    /// Reject the whole command if any value is not a finite number
    pub fn validate(&self) -> TelemetryResult<()> {
        let fields = [
            ("altitude", self.target_altitude),
            ("speed", self.target_speed),
            ("heading", self.target_heading),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(TelemetryError::InvalidCommand(format!("{}={}", name, v)));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut params = Vec::new();
        if let Some(altitude) = self.target_altitude {
            params.push(format!("altitude={:.1}m", altitude));
        }
        if let Some(speed) = self.target_speed {
            params.push(format!("speed={:.1}m/s", speed));
        }
        if let Some(heading) = self.target_heading {
            params.push(format!("heading={:.1}°", heading));
        }
        if self.emergency_stop {
            params.push("EMERGENCY STOP".to_string());
        }
        write!(f, "ControlCommand({})", params.join(", "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Normal,
    Emergency,
}

/// Serializes control commands onto a `TelemetrySimulator`.
///
/// Shared as `Arc<VehicleControlSystem>`; maneuvers need the `Arc` to keep
/// feeding the queue after the call that started them returns.
pub struct VehicleControlSystem {
    simulator: Arc<TelemetrySimulator>,
    config: ControlConfig,
    emergency: AtomicBool,
    running: AtomicBool,
    sender: mpsc::UnboundedSender<ControlCommand>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<ControlCommand>>,
    maneuvers: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
    applied: AtomicU64,
    rejected: AtomicU64,
}

impl VehicleControlSystem {
    pub fn new(simulator: Arc<TelemetrySimulator>, config: ControlConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        log::info!("Initialized control system");

        VehicleControlSystem {
            simulator,
            config,
            emergency: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sender,
            receiver: AsyncMutex::new(receiver),
            maneuvers: Mutex::new(JoinSet::new()),
            shutdown,
            applied: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn maneuvers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.maneuvers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ──

    /// Consume loop. Returns after `stop()`, once every maneuver has been
    /// cancelled and joined.
    pub async fn start(&self) {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            log::warn!("Control system already started");
            return;
        };
        let mut shutdown = self.shutdown.subscribe();

        self.running.store(true, Ordering::SeqCst);
        log::info!("Starting vehicle control system");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                received = timeout(self.config.poll_timeout(), receiver.recv()) => match received {
                    Ok(Some(command)) => {
                        if let Err(e) = self.process_command(command).await {
                            log::error!("Error processing command: {}", e);
                        }
                    }
                    // Unreachable while we hold `sender`, but don't spin if it happens
                    Ok(None) => break,
                    // Normal timeout, just re-check the stop signal
                    Err(_) => continue,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.cleanup_maneuvers().await;
        self.shutdown.send_replace(false);
        log::info!(
            "Vehicle control system stopped ({} applied, {} rejected)",
            self.applied_count(),
            self.rejected_count()
        );
    }

    pub fn stop(&self) {
        log::info!("Stopping vehicle control system");
        self.shutdown.send_replace(true);
    }

    async fn cleanup_maneuvers(&self) {
        let mut tasks = std::mem::take(&mut *self.maneuvers());
        if tasks.is_empty() {
            return;
        }

        log::debug!("Cleaning up {} pending maneuvers", tasks.len());
        tasks.abort_all();
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    log::error!("Maneuver task failed: {}", e);
                }
            }
        }
    }

    // ── Command submission ──

    pub fn send_command(&self, command: ControlCommand) -> TelemetryResult<()> {
        if !self.is_running() {
            return Err(TelemetryError::NotRunning);
        }
        log::debug!("Queueing command: {}", command);
        self.sender
            .send(command)
            .map_err(|_| TelemetryError::NotRunning)
    }

    async fn process_command(&self, command: ControlCommand) -> TelemetryResult<()> {
        log::info!("Processing command: {}", command);

        if command.emergency_stop {
            self.activate_emergency_mode().await;
            return Ok(());
        }

        if self.is_emergency_mode() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("Command rejected: Emergency mode active ({})", command);
            return Ok(());
        }

        command.validate()?;

        if let Some(altitude) = command.target_altitude {
            self.simulator.set_target_altitude(altitude);
        }
        if let Some(speed) = command.target_speed {
            self.simulator.set_target_speed(speed);
        }
        if let Some(heading) = command.target_heading {
            self.simulator.set_heading(heading);
        }
        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Latch emergency mode, then bring speed to zero before altitude
    async fn activate_emergency_mode(&self) {
        log::warn!("EMERGENCY MODE ACTIVATED");
        self.emergency.store(true, Ordering::SeqCst);

        log::debug!("Emergency sequence - Setting speed to 0");
        self.simulator.set_target_speed(0.0);
        sleep(self.config.emergency_pause()).await;

        log::debug!("Emergency sequence - Setting altitude to 0");
        self.simulator.set_target_altitude(0.0);

        // A target the simulator has already reached reads back as None
        let speed = self.simulator.target_speed();
        let altitude = self.simulator.target_altitude();
        if speed.unwrap_or(0.0) != 0.0 || altitude.unwrap_or(0.0) != 0.0 {
            log::error!(
                "Failed to set emergency parameters: speed={:?} altitude={:?}",
                speed,
                altitude
            );
        }
    }

    /// Leave emergency mode if the vehicle is down and stopped.
    ///
    /// Returns true when the sequencer is (now) in normal mode.
    pub fn clear_emergency_mode(&self) -> bool {
        if !self.is_emergency_mode() {
            return true;
        }

        let state = self.simulator.vehicle_state();
        if state.is_landed() {
            self.emergency.store(false, Ordering::SeqCst);
            log::info!("Emergency mode cleared");
            true
        } else {
            log::warn!(
                "Cannot clear emergency mode: altitude={:.1}m speed={:.1}m/s",
                state.altitude,
                state.speed
            );
            false
        }
    }

    // ── Maneuvers ──

    pub fn execute_takeoff_sequence(self: &Arc<Self>, target_altitude: f64) -> TelemetryResult<()> {
        self.check_maneuver_allowed("takeoff")?;
        let climb = ControlCommand::new()
            .with_altitude(TAKEOFF_CLIMB_ALTITUDE)
            .with_speed(TAKEOFF_CLIMB_SPEED);
        let cruise = ControlCommand::new()
            .with_altitude(target_altitude)
            .with_speed(CRUISE_SPEED);
        cruise.validate()?;

        log::info!("Starting takeoff sequence to {:.1}m", target_altitude);
        self.spawn_maneuver("Takeoff", vec![climb, cruise]);
        Ok(())
    }

    pub fn execute_landing_sequence(self: &Arc<Self>) -> TelemetryResult<()> {
        self.check_maneuver_allowed("landing")?;
        let slow = ControlCommand::new().with_speed(LANDING_SLOW_SPEED);
        let approach = ControlCommand::new()
            .with_altitude(0.0)
            .with_speed(LANDING_APPROACH_SPEED);

        log::info!("Starting landing sequence");
        self.spawn_maneuver("Landing", vec![slow, approach]);
        Ok(())
    }

    fn check_maneuver_allowed(&self, name: &str) -> TelemetryResult<()> {
        if self.is_emergency_mode() {
            log::warn!("Refusing {} sequence: Emergency mode active", name);
            return Err(TelemetryError::EmergencyActive);
        }
        if !self.is_running() {
            return Err(TelemetryError::NotRunning);
        }
        Ok(())
    }

    /// Send `steps` one at a time with the configured pause in between.
    fn spawn_maneuver(self: &Arc<Self>, name: &'static str, steps: Vec<ControlCommand>) {
        let control = Arc::clone(self);
        let step_delay = self.config.maneuver_step();

        let mut tasks = self.maneuvers();
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            for (phase, command) in steps.into_iter().enumerate() {
                if phase > 0 {
                    sleep(step_delay).await;
                }
                log::debug!("{} phase {}: {}", name, phase + 1, command);
                if let Err(e) = control.send_command(command) {
                    log::error!("Error in {} sequence: {}", name, e);
                    return;
                }
            }
        });
    }

    // ── Read-only accessors ──

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> ControlMode {
        if self.is_emergency_mode() {
            ControlMode::Emergency
        } else {
            ControlMode::Normal
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Maneuvers that are still sending commands
    pub fn active_maneuvers(&self) -> usize {
        let mut tasks = self.maneuvers();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn simulator(&self) -> &Arc<TelemetrySimulator> {
        &self.simulator
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Fixture {
        simulator: Arc<TelemetrySimulator>,
        control: Arc<VehicleControlSystem>,
        handle: JoinHandle<()>,
    }

    impl Fixture {
        async fn shutdown(self) {
            self.control.stop();
            self.handle.await.unwrap();
        }
    }

    /// Running sequencer over a simulator that is *not* ticking, so targets
    /// stay where the commands put them.
    async fn running_control(initial_altitude: f64) -> Fixture {
        let simulator = Arc::new(TelemetrySimulator::new(SimulatorConfig {
            update_interval: 0.1,
            noise_factor: 0.0,
            initial_altitude,
            initial_latitude: 0.0,
            initial_longitude: 0.0,
            seed: Some(1),
            ..Default::default()
        }));
        let control = Arc::new(VehicleControlSystem::new(
            Arc::clone(&simulator),
            ControlConfig::default(),
        ));
        let handle = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(control.is_running());

        Fixture { simulator, control, handle }
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_control_command_creation() {
        let command = ControlCommand::new()
            .with_altitude(100.0)
            .with_speed(20.0)
            .with_heading(45.0);
        assert_eq!(command.target_altitude, Some(100.0));
        assert_eq!(command.target_speed, Some(20.0));
        assert_eq!(command.target_heading, Some(45.0));
        assert!(!command.emergency_stop);
        assert!(ControlCommand::emergency().emergency_stop);
    }

    #[test]
    fn test_control_command_display() {
        let command = ControlCommand::new().with_altitude(200.0).with_speed(20.0);
        assert_eq!(command.to_string(), "ControlCommand(altitude=200.0m, speed=20.0m/s)");
        assert_eq!(ControlCommand::emergency().to_string(), "ControlCommand(EMERGENCY STOP)");
        assert_eq!(ControlCommand::new().to_string(), "ControlCommand()");
    }

    #[test]
    fn test_control_command_json() {
        let command: ControlCommand =
            serde_json::from_str(r#"{ "target_altitude": 150.0, "emergency_stop": false }"#).unwrap();
        assert_eq!(command, ControlCommand::new().with_altitude(150.0));

        let emergency: ControlCommand = serde_json::from_str(r#"{ "emergency_stop": true }"#).unwrap();
        assert_eq!(emergency, ControlCommand::emergency());
    }

    #[test]
    fn test_control_command_validation() {
        assert!(ControlCommand::new().with_altitude(10.0).validate().is_ok());
        assert!(matches!(
            ControlCommand::new().with_speed(f64::NAN).validate(),
            Err(TelemetryError::InvalidCommand(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_running() {
        let simulator = Arc::new(TelemetrySimulator::default());
        let control = VehicleControlSystem::new(simulator, ControlConfig::default());
        assert_eq!(
            control.send_command(ControlCommand::new().with_altitude(10.0)),
            Err(TelemetryError::NotRunning)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_processing() {
        let fx = running_control(100.0).await;

        fx.control
            .send_command(ControlCommand::new().with_altitude(200.0).with_speed(15.0).with_heading(90.0))
            .unwrap();
        settle(200).await;

        assert_eq!(fx.simulator.target_altitude(), Some(200.0));
        assert_eq!(fx.simulator.target_speed(), Some(15.0));
        assert_eq!(fx.simulator.heading(), 90.0);
        assert_eq!(fx.control.applied_count(), 1);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_applied_in_order() {
        let fx = running_control(100.0).await;

        for altitude in [10.0, 20.0, 30.0] {
            fx.control.send_command(ControlCommand::new().with_altitude(altitude)).unwrap();
        }
        fx.control.send_command(ControlCommand::new().with_heading(-30.0)).unwrap();
        settle(100).await;

        assert_eq!(fx.simulator.target_altitude(), Some(30.0));
        assert_eq!(fx.simulator.heading(), 330.0);
        assert_eq!(fx.control.applied_count(), 4);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_mode() {
        let fx = running_control(100.0).await;

        fx.control
            .send_command(ControlCommand::new().with_altitude(200.0).with_speed(20.0))
            .unwrap();
        settle(200).await;
        assert_eq!(fx.simulator.target_altitude(), Some(200.0));
        assert_eq!(fx.simulator.target_speed(), Some(20.0));

        fx.control.send_command(ControlCommand::emergency()).unwrap();
        settle(300).await;

        assert!(fx.control.is_emergency_mode());
        assert_eq!(fx.control.mode(), ControlMode::Emergency);
        assert_eq!(fx.simulator.target_speed(), Some(0.0));
        assert_eq!(fx.simulator.target_altitude(), Some(0.0));

        fx.control
            .send_command(ControlCommand::new().with_altitude(100.0).with_speed(10.0))
            .unwrap();
        settle(200).await;

        assert!(fx.control.is_emergency_mode(), "emergency mode should persist");
        assert_eq!(fx.simulator.target_speed(), Some(0.0));
        assert_eq!(fx.simulator.target_altitude(), Some(0.0));
        assert_eq!(fx.control.rejected_count(), 1);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_zeroes_speed_before_altitude() {
        let fx = running_control(100.0).await;

        fx.control
            .send_command(ControlCommand::new().with_altitude(200.0).with_speed(20.0))
            .unwrap();
        fx.control.send_command(ControlCommand::emergency()).unwrap();

        // Inside the pause: speed already zeroed, altitude untouched
        settle(50).await;
        assert_eq!(fx.simulator.target_speed(), Some(0.0));
        assert_eq!(fx.simulator.target_altitude(), Some(200.0));

        settle(100).await;
        assert_eq!(fx.simulator.target_altitude(), Some(0.0));
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_blocks_queued_commands() {
        let fx = running_control(100.0).await;

        fx.control.send_command(ControlCommand::emergency()).unwrap();
        fx.control
            .send_command(ControlCommand::new().with_altitude(500.0).with_speed(30.0))
            .unwrap();
        settle(400).await;

        assert_eq!(fx.simulator.target_altitude(), Some(0.0));
        assert_eq!(fx.simulator.target_speed(), Some(0.0));
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_emergency_refused_while_airborne() {
        let fx = running_control(100.0).await;

        fx.control.send_command(ControlCommand::emergency()).unwrap();
        settle(300).await;

        assert!(!fx.control.clear_emergency_mode());
        assert!(fx.control.is_emergency_mode());
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_emergency_once_landed() {
        let fx = running_control(0.0).await;

        fx.control.send_command(ControlCommand::emergency()).unwrap();
        settle(300).await;
        assert!(fx.control.is_emergency_mode());

        assert!(fx.control.clear_emergency_mode());
        assert!(!fx.control.is_emergency_mode());

        // Normal commands flow again
        fx.control.send_command(ControlCommand::new().with_altitude(50.0)).unwrap();
        settle(100).await;
        assert_eq!(fx.simulator.target_altitude(), Some(50.0));
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_does_not_stop_loop() {
        let fx = running_control(100.0).await;

        fx.control
            .send_command(ControlCommand::new().with_altitude(300.0).with_speed(f64::NAN))
            .unwrap();
        fx.control.send_command(ControlCommand::new().with_speed(12.0)).unwrap();
        settle(100).await;

        // Nothing from the bad command was applied
        assert_eq!(fx.simulator.target_altitude(), None);
        assert_eq!(fx.simulator.target_speed(), Some(12.0));
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeoff_sequence() {
        let fx = running_control(0.0).await;

        fx.control.execute_takeoff_sequence(300.0).unwrap();
        settle(500).await;
        assert_eq!(fx.simulator.target_altitude(), Some(50.0));
        assert_eq!(fx.simulator.target_speed(), Some(5.0));
        assert_eq!(fx.control.active_maneuvers(), 1);

        settle(1000).await;
        assert_eq!(fx.simulator.target_altitude(), Some(300.0));
        assert_eq!(fx.simulator.target_speed(), Some(20.0));
        assert_eq!(fx.control.active_maneuvers(), 0);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_landing_sequence() {
        let fx = running_control(200.0).await;

        fx.control.execute_landing_sequence().unwrap();
        settle(500).await;
        assert_eq!(fx.simulator.target_speed(), Some(10.0));
        assert_eq!(fx.simulator.target_altitude(), None);

        settle(1000).await;
        assert_eq!(fx.simulator.target_altitude(), Some(0.0));
        assert_eq!(fx.simulator.target_speed(), Some(5.0));
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_maneuvers_refused_in_emergency() {
        let fx = running_control(100.0).await;

        fx.control.send_command(ControlCommand::emergency()).unwrap();
        settle(300).await;

        assert_eq!(
            fx.control.execute_takeoff_sequence(300.0),
            Err(TelemetryError::EmergencyActive)
        );
        assert_eq!(fx.control.execute_landing_sequence(), Err(TelemetryError::EmergencyActive));
        assert_eq!(fx.control.active_maneuvers(), 0);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_interrupts_maneuver() {
        let fx = running_control(0.0).await;

        fx.control.execute_takeoff_sequence(300.0).unwrap();
        settle(200).await;
        fx.control.send_command(ControlCommand::emergency()).unwrap();
        settle(1500).await;

        // Second takeoff phase arrived after the emergency and was dropped
        assert_eq!(fx.simulator.target_altitude(), Some(0.0));
        assert_eq!(fx.simulator.target_speed(), Some(0.0));
        assert_eq!(fx.control.rejected_count(), 1);
        fx.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_maneuvers() {
        let fx = running_control(0.0).await;

        fx.control.execute_takeoff_sequence(300.0).unwrap();
        settle(100).await;

        let control = Arc::clone(&fx.control);
        let simulator = Arc::clone(&fx.simulator);
        fx.shutdown().await;

        assert!(!control.is_running());
        assert_eq!(control.active_maneuvers(), 0);
        assert_eq!(
            control.send_command(ControlCommand::new()),
            Err(TelemetryError::NotRunning)
        );

        // The cruise phase never runs
        settle(2000).await;
        assert_eq!(simulator.target_altitude(), Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let fx = running_control(0.0).await;

        tokio::time::timeout(Duration::from_secs(1), fx.control.start())
            .await
            .expect("second start should return immediately");
        assert!(fx.control.is_running());
        fx.shutdown().await;
    }
}
