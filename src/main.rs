use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration, Instant};

use telemetry_toolkit::dashboard::{self, DashboardState};
use telemetry_toolkit::{
    AppConfig, FlightPlan, FlightSummary, TelemetrySimulator, VehicleControlSystem,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PlanArg {
    /// Hold position; only dashboard commands move the vehicle
    #[value(name = "none")]
    Hold,
    Basic,
    Tour,
    /// Takeoff maneuver to the configured default altitude
    Takeoff,
}

#[derive(Parser, Debug)]
#[command(name = "telemetry_sim")]
#[command(about = "Synthetic vehicle telemetry generator", long_about = None)]
struct Args {
    /// JSON config file (missing keys keep their defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "30")]
    duration: u64,

    /// Seconds per simulation tick
    #[arg(long)]
    update_interval: Option<f64>,

    /// Noise sigma as a fraction of each value
    #[arg(long)]
    noise_factor: Option<f64>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Initial latitude
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Initial longitude
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Scripted flight to run
    #[arg(long, value_enum, default_value = "basic")]
    plan: PlanArg,

    /// Serve the dashboard feed on this port
    #[arg(long)]
    dashboard_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        let sim = &mut config.simulator;
        if let Some(v) = self.update_interval {
            sim.update_interval = v;
        }
        if let Some(v) = self.noise_factor {
            sim.noise_factor = v;
        }
        if self.seed.is_some() {
            sim.seed = self.seed;
        }
        if let Some(v) = self.lat {
            sim.initial_latitude = v;
        }
        if let Some(v) = self.lon {
            sim.initial_longitude = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let plan = match args.plan {
        PlanArg::Basic => Some(FlightPlan::basic()),
        PlanArg::Tour => Some(FlightPlan::tour()),
        PlanArg::Hold | PlanArg::Takeoff => None,
    };
    if let Some((lat, lon)) = plan.as_ref().and_then(|p| p.origin) {
        config.simulator.initial_latitude = lat;
        config.simulator.initial_longitude = lon;
    }
    args.apply(&mut config);

    let interval = config.simulator.update_interval;
    if !(interval.is_finite() && interval > 0.0) {
        bail!("update interval must be a positive number of seconds, got {}", interval);
    }

    println!("Telemetry simulator starting");
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Update interval: {} s", config.simulator.update_interval);
    println!("  Noise factor: {}", config.simulator.noise_factor);
    println!("  Plan: {:?}", args.plan);

    let simulator = Arc::new(TelemetrySimulator::new(config.simulator.clone()));
    let control = Arc::new(VehicleControlSystem::new(
        Arc::clone(&simulator),
        config.control.clone(),
    ));

    let sim_task = {
        let simulator = Arc::clone(&simulator);
        tokio::spawn(async move { simulator.run().await })
    };
    let control_task = {
        let control = Arc::clone(&control);
        tokio::spawn(async move { control.start().await })
    };

    let deadline = Instant::now() + Duration::from_secs(1);
    while !control.is_running() {
        if Instant::now() > deadline {
            bail!("control system failed to start");
        }
        sleep(Duration::from_millis(10)).await;
    }

    let dashboard = match args.dashboard_port {
        Some(port) => {
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let state = DashboardState::new(Arc::clone(&simulator), Arc::clone(&control));
            let handle = tokio::spawn(dashboard::serve(state, port, async move {
                let _ = stop_rx.await;
            }));
            Some((stop_tx, handle))
        }
        None => None,
    };

    let plan_task = match plan {
        Some(plan) => {
            let control = Arc::clone(&control);
            Some(tokio::spawn(async move {
                if let Err(e) = plan.run(&control).await {
                    log::warn!("Flight plan '{}' aborted: {}", plan.name, e);
                }
            }))
        }
        None => {
            if args.plan == PlanArg::Takeoff {
                control.execute_takeoff_sequence(config.control.default_takeoff_altitude)?;
            }
            None
        }
    };

    let run_for = async {
        if args.duration == 0 {
            std::future::pending::<()>().await;
        } else {
            sleep(Duration::from_secs(args.duration)).await;
        }
    };
    tokio::select! {
        _ = run_for => log::info!("Run duration elapsed"),
        result = tokio::signal::ctrl_c() => {
            result?;
            log::info!("Ctrl-C received, shutting down");
        }
    }

    if let Some(task) = plan_task {
        task.abort();
    }
    control.stop();
    simulator.stop();
    control_task.await?;
    sim_task.await?;

    if let Some((stop_tx, handle)) = dashboard {
        let _ = stop_tx.send(());
        handle.await??;
    }

    println!("\nFinal telemetry data:");
    for snapshot in simulator.recent(5) {
        println!("Time: {}", snapshot.timestamp);
        println!("Altitude: {:.1} m", snapshot.altitude);
        println!("Speed: {:.1} m/s", snapshot.speed);
        println!("Battery: {:.1}%", snapshot.battery_level);
        println!("Sensor Readings: {:?}", snapshot.sensor_readings);
        println!("---");
    }

    let history = simulator.recent(simulator.history_len());
    match FlightSummary::from_snapshots(&history) {
        Some(summary) => println!("\nFlight summary:\n{}", summary),
        None => println!("\nNo telemetry recorded"),
    }
    if simulator.failed_tick_count() > 0 {
        println!("Failed ticks: {}", simulator.failed_tick_count());
    }

    Ok(())
}
