//! Production wiring: `build_channels` + `build_actuator` + `ControlLoop`
//! with hardware sensors and a sysfs relay laid out in a temp directory.
//!
//! No `/dev` nodes exist under the temp root, so every hardware sensor comes
//! up without its bus.  The relay is real as far as the driver can tell: it
//! writes and reads back `gpio<N>/value`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use greenhouse::adapters::time::ManualClock;
use greenhouse::app::ControlLoop;
use greenhouse::app::ports::SharedClock;
use greenhouse::config::SystemConfig;
use greenhouse::control::{Command, Switch};
use greenhouse::error::{ConfigError, SensorFault};
use greenhouse::measurement::Quality;
use greenhouse::sensors::{self, LinuxBuses};
use greenhouse::{drivers, error::Error};

use super::mock_hw::{RecordingSink, id};

const WAIT: Duration = Duration::from_secs(2);
const RELAY_GPIO: u32 = 27;

struct Board {
    root: PathBuf,
}

impl Board {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("greenhouse-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("dev")).unwrap();
        std::fs::create_dir_all(root.join("gpio").join(format!("gpio{RELAY_GPIO}"))).unwrap();
        Self { root }
    }

    fn dev(&self) -> PathBuf {
        self.root.join("dev")
    }

    fn gpio(&self) -> PathBuf {
        self.root.join("gpio")
    }

    fn relay_level(&self) -> String {
        let value = self.gpio().join(format!("gpio{RELAY_GPIO}")).join("value");
        std::fs::read_to_string(value).unwrap().trim().to_string()
    }

    fn config(&self, moisture_bus: &str) -> String {
        format!(
            r#"{{
            "control_loop_interval_ms": 1000,
            "sensors": [
                {{ "id": "bed", "poll_interval_ms": 1000, "read_timeout_ms": 500,
                   "bus": {moisture_bus} }},
                {{ "id": "light", "poll_interval_ms": 1000, "read_timeout_ms": 500,
                   "bus": {{ "type": "bh1750", "i2c_bus": 1 }} }}
            ],
            "thresholds": {{ "moisture_low": 30, "moisture_high": 60,
                            "min_on_duration_secs": 30, "min_off_duration_secs": 60,
                            "max_on_duration_secs": 600 }},
            "actuator": {{ "id": "pump", "moisture_sensor": "bed",
                          "output": {{ "type": "sysfs_gpio", "gpio": {RELAY_GPIO},
                                      "root": "{}" }} }}
        }}"#,
            json_path(&self.gpio())
        )
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn json_path(p: &Path) -> String {
    p.display().to_string().replace('\\', "\\\\")
}

#[test]
fn missing_moisture_bus_never_switches_a_real_relay() {
    let board = Board::new("no-bus");
    let config = SystemConfig::from_json(&board.config(
        r#"{ "type": "gies_o_mat", "gpio": 17, "sample_window_ms": 100 }"#,
    ))
    .unwrap();

    let clock = ManualClock::new(0);
    let shared: SharedClock = Arc::new(clock.clone());
    let pump_level = Arc::new(AtomicBool::new(false));
    let mut buses = LinuxBuses::with_dev_root(board.dev());
    let channels = sensors::build_channels(&config, &mut buses, &shared, &pump_level);
    let relay = drivers::build_actuator(&config.actuator, &pump_level).unwrap();
    assert_eq!(board.relay_level(), "0");

    let sink = RecordingSink::new();
    let mut lp = ControlLoop::new(&config, channels, relay, sink.clone(), shared).unwrap();

    // Half an hour of ticks: long enough for any drying model to cross
    // moisture_low several times over.
    for t in (0..=1_800u64).step_by(10) {
        clock.set(t * 1_000);
        let decision = lp.tick_settled(WAIT).expect("loop never halts here");
        assert_eq!(decision.command, Command::NoChange, "t={t}s");
        assert!(decision.degraded, "t={t}s");
        assert_eq!(board.relay_level(), "0", "t={t}s");
    }

    let bed = lp.store().get(&id("bed")).unwrap();
    assert_eq!(bed.quality, Quality::Failed(SensorFault::Disconnected));
    assert!(bed.value.is_none());
    let light = lp.store().get(&id("light")).unwrap();
    assert_eq!(light.quality, Quality::Failed(SensorFault::Disconnected));

    assert_eq!(lp.shutdown().commanded, Switch::Off);
    assert_eq!(board.relay_level(), "0");
}

#[test]
fn simulated_moisture_cannot_drive_a_real_relay() {
    let board = Board::new("sim-bed");
    let result = SystemConfig::from_json(&board.config(
        r#"{ "type": "simulated", "quantity": "moisture", "base": 10, "irrigated": true }"#,
    ));
    assert!(matches!(
        result,
        Err(ConfigError::SimulatedMoistureOnRelay(ref s)) if s == &id("bed")
    ));

    let err: Error = ConfigError::SimulatedMoistureOnRelay(id("bed")).into();
    assert!(err.to_string().contains("hardware relay"));
}
