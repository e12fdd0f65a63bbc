//! Greenhouse controller process entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  Sensor drivers     PumpRelay        LogEventSink  JsonLines   │
//! │  (SensorChannel)    (ActuatorDriver) (EventSink)   (EventSink) │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │                 ControlLoop (core)                     │    │
//! │  │  PollScheduler · StateStore · Policy · Safety · FSM    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Signal thread (tokio) ──▶ stop flag ──▶ graceful shutdown     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exit codes: 0 after a graceful shutdown, 2 when the configuration is
//! rejected, 1 for any other startup failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use greenhouse::adapters::log_sink::LogEventSink;
use greenhouse::adapters::telemetry::JsonLinesSink;
use greenhouse::adapters::time::MonotonicClock;
use greenhouse::app::ControlLoop;
use greenhouse::app::ports::SharedClock;
use greenhouse::config::SystemConfig;
use greenhouse::control::ActuatorState;
use greenhouse::error::Error;
use greenhouse::{drivers, sensors};

const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "greenhouse",
    version,
    about = "Greenhouse sensor acquisition and irrigation controller"
)]
struct Cli {
    /// JSON configuration file.  Without it a fully simulated greenhouse runs.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Append JSON-lines telemetry here (overrides `telemetry_path`).
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long, default_value_t = false)]
    check: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("╔══════════════════════════════════════╗");
    info!("║  Greenhouse v{:<24}║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 1. Configuration ──────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match SystemConfig::load(path) {
            Ok(c) => {
                info!("Config loaded from {}", path.display());
                c
            }
            Err(e) => {
                error!("Configuration rejected: {e}");
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => {
            info!("No config file given, running the simulated greenhouse");
            SystemConfig::default()
        }
    };

    if cli.check {
        info!(
            "Configuration OK: {} sensors, pump '{}' on '{}'",
            config.sensors.len(),
            config.actuator.id,
            config.actuator.moisture_sensor
        );
        return ExitCode::SUCCESS;
    }

    // ── 2. Run until signalled ────────────────────────────────
    match run(&config, &cli) {
        Ok(last) => {
            info!(
                "Shut down cleanly, pump '{}' {}",
                last.actuator_id, last.commanded
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            if matches!(e.downcast_ref::<Error>(), Some(Error::Config(_))) {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(config: &SystemConfig, cli: &Cli) -> Result<ActuatorState> {
    let clock: SharedClock = Arc::new(MonotonicClock::new());
    let pump_level = Arc::new(AtomicBool::new(false));

    // ── Adapters ──────────────────────────────────────────────
    let mut buses = sensors::LinuxBuses::new();
    let channels = sensors::build_channels(config, &mut buses, &clock, &pump_level);
    let actuator = drivers::build_actuator(&config.actuator, &pump_level)?;

    let telemetry_path = cli
        .telemetry
        .clone()
        .or_else(|| config.telemetry_path.as_ref().map(PathBuf::from));
    let telemetry = match telemetry_path {
        Some(path) => Some(
            JsonLinesSink::create(&path)
                .with_context(|| format!("cannot open telemetry file {}", path.display()))?,
        ),
        None => None,
    };
    let sink = (LogEventSink::new(), telemetry);

    // ── Core ──────────────────────────────────────────────────
    let stop = Arc::new(AtomicBool::new(false));
    watch_signals(stop.clone())?;

    let mut control = ControlLoop::new(config, channels, actuator, sink, clock)?;
    info!("System ready. Entering control loop.");
    Ok(control.run(&stop))
}

/// Set `stop` on SIGINT or SIGTERM.
fn watch_signals(stop: Arc<AtomicBool>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot build signal runtime")?;
    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || match rt.block_on(shutdown_signal()) {
            Ok(()) => {
                info!("Shutdown signal received");
                stop.store(true, Ordering::Release);
            }
            Err(e) => warn!("Signal handling unavailable: {e}"),
        })
        .context("cannot spawn signal thread")?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    futures_lite::future::or(tokio::signal::ctrl_c(), async {
        term.recv().await;
        Ok(())
    })
    .await
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
