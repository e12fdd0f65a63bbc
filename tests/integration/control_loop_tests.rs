//! Integration tests for the ControlLoop → policy → pump pipeline.
//!
//! Sensor reads come from scripted channels on real worker threads; time is
//! a `ManualClock`, so every decision point is explicit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use greenhouse::adapters::telemetry::JsonLinesSink;
use greenhouse::adapters::time::ManualClock;
use greenhouse::app::{AppEvent, ControlLoop};
use greenhouse::config::SystemConfig;
use greenhouse::control::{Command, DecisionReason, Switch};
use greenhouse::error::{Error, SafetyFault, SensorFault};
use greenhouse::fsm::LoopPhase;
use greenhouse::measurement::{Quality, Quantity};

use super::mock_hw::{MockPump, Reading, RecordingSink, Script, ScriptedChannel, config_with, id, sensor_spec};

const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    lp: ControlLoop<MockPump, RecordingSink>,
    clock: ManualClock,
    soil: Script,
    pump: MockPump,
    sink: RecordingSink,
}

fn rig() -> Rig {
    let config = config_with(Vec::new());
    let clock = ManualClock::new(0);
    let soil = Script::new(Reading::Value(45.0));
    let pump = MockPump::new();
    let sink = RecordingSink::new();
    let lp = ControlLoop::new(
        &config,
        vec![ScriptedChannel::boxed("soil", Quantity::Moisture, &soil, &clock)],
        pump.clone(),
        sink.clone(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    Rig {
        lp,
        clock,
        soil,
        pump,
        sink,
    }
}

impl Rig {
    fn step(&mut self, at_secs: u64, reading: Reading) -> Command {
        self.soil.set(reading);
        self.clock.set(at_secs * 1_000);
        self.lp.tick_settled(WAIT).map_or(Command::NoChange, |d| d.command)
    }
}

// ── Scenarios ─────────────────────────────────────────────────

#[test]
fn moisture_scenario_switches_on_then_off() {
    let mut r = rig();
    assert_eq!(r.step(0, Reading::Value(45.0)), Command::NoChange);
    assert_eq!(r.step(10, Reading::Value(28.0)), Command::On);
    assert_eq!(r.step(40, Reading::Value(70.0)), Command::Off);

    assert_eq!(r.pump.calls(), vec![Switch::On, Switch::Off]);
    let state = r.lp.actuator_state();
    assert_eq!(state.commanded, Switch::Off);
    assert_eq!(state.last_transition_time, Some(40_000));
}

#[test]
fn stuck_pump_is_cut_off_after_max_on() {
    let mut r = rig();
    r.step(0, Reading::Value(20.0));
    assert_eq!(r.lp.actuator_state().commanded, Switch::On);

    // Still dry, but the pump has been on for 601 s.
    let cmd = r.step(601, Reading::Value(20.0));
    assert_eq!(cmd, Command::Off);
    assert_eq!(r.pump.last_call(), Some(Switch::Off));
    assert!(
        r.sink.count(|e| matches!(
            e,
            AppEvent::Decision { decision, .. } if decision.reason == DecisionReason::SafetyCutoff
        )) == 1
    );
}

#[test]
fn hysteresis_band_does_not_chatter() {
    let mut r = rig();
    let levels = [45.0, 29.0, 31.0, 29.5, 45.0, 59.0, 61.0, 59.5, 61.0, 40.0];
    for (i, level) in levels.iter().enumerate() {
        r.step(100 * (i as u64 + 1), Reading::Value(*level));
    }
    assert_eq!(r.pump.calls(), vec![Switch::On, Switch::Off]);
}

#[test]
fn dwell_defers_the_transition_to_the_first_allowed_tick() {
    let mut r = rig();
    r.step(0, Reading::Value(20.0));
    // Wet already, but min_on is 30 s.
    assert_eq!(r.step(10, Reading::Value(70.0)), Command::NoChange);
    assert_eq!(r.step(29, Reading::Value(70.0)), Command::NoChange);
    assert_eq!(r.step(30, Reading::Value(70.0)), Command::Off);
    // Dry again, but min_off is 60 s.
    assert_eq!(r.step(60, Reading::Value(20.0)), Command::NoChange);
    assert_eq!(r.step(90, Reading::Value(20.0)), Command::On);
}

// ── Degraded mode ─────────────────────────────────────────────

#[test]
fn failed_moisture_never_starts_the_pump() {
    let mut r = rig();
    r.step(0, Reading::Value(45.0));
    for t in 1..=5 {
        assert_eq!(r.step(t * 100, Reading::Fault(SensorFault::Bus)), Command::NoChange);
    }
    assert!(r.pump.calls().is_empty());

    let feed = r.lp.feed();
    assert!(feed.is_degraded());
    assert_ne!(feed.fault_flags() & SafetyFault::MoistureUntrusted.mask(), 0);
    assert_eq!(
        feed.snapshot()[&id("soil")].quality,
        Quality::Failed(SensorFault::Bus)
    );

    // Recovery clears degraded mode and lets the policy act again.
    assert_eq!(r.step(1_000, Reading::Value(20.0)), Command::On);
    assert!(!feed.is_degraded());
    assert_eq!(
        r.sink
            .count(|e| matches!(e, AppEvent::DegradedChanged { .. })),
        2
    );
}

#[test]
fn stale_moisture_is_untrusted() {
    let mut r = rig();
    r.step(0, Reading::Value(45.0));
    // The sensor hangs; its last good reading ages past 3 × 1 s.
    r.soil.set_delay(Duration::from_secs(1));
    r.clock.set(3_001);
    let decision = r.lp.tick().unwrap();
    assert_eq!(decision.reason, DecisionReason::SensorUntrusted);
    assert!(decision.degraded);
    assert_eq!(
        r.lp.feed().snapshot()[&id("soil")].quality,
        Quality::Stale
    );
    r.soil.set_delay(Duration::ZERO);
    r.lp.shutdown();
}

// ── Escalation ────────────────────────────────────────────────

#[test]
fn unconfirmed_commands_escalate_to_halt() {
    let mut r = rig();
    r.pump.fail(true);
    for i in 0..4 {
        r.step(100 + i * 100, Reading::Value(10.0));
    }
    assert!(r.lp.is_halted());
    assert_eq!(r.lp.phase(), LoopPhase::Halted);
    assert_eq!(r.pump.calls().len(), 4);
    assert_eq!(r.lp.actuator_state().commanded, Switch::Off);
    assert_eq!(r.sink.count(|e| matches!(e, AppEvent::Halted { .. })), 1);

    // Halted: observation continues, actuation does not.
    r.pump.fail(false);
    let reads = r.soil.reads();
    assert!(r.step(1_000, Reading::Value(10.0)) == Command::NoChange);
    assert_eq!(r.pump.calls().len(), 4);
    assert!(r.soil.reads() > reads);
    assert!(r.lp.feed().is_halted());
    assert_ne!(
        r.lp.fault_flags() & SafetyFault::ActuatorUnresponsive.mask(),
        0
    );
}

#[test]
fn a_confirmed_command_resets_the_failure_count() {
    let mut r = rig();
    r.pump.fail(true);
    r.step(100, Reading::Value(10.0));
    r.step(200, Reading::Value(10.0));
    assert_eq!(r.lp.actuator_state().consecutive_command_count, 2);
    r.pump.fail(false);
    r.step(300, Reading::Value(10.0));
    assert_eq!(r.lp.actuator_state().consecutive_command_count, 0);
    assert_eq!(r.lp.actuator_state().commanded, Switch::On);
    assert!(!r.lp.is_halted());
}

// ── Isolation and snapshot invariant ──────────────────────────

#[test]
fn failing_sensor_does_not_block_the_others() {
    let config = config_with(vec![
        sensor_spec("lux", Quantity::Illuminance, 1_000),
        sensor_spec("air", Quantity::Temperature, 1_000),
    ]);
    let clock = ManualClock::new(0);
    let soil = Script::new(Reading::Value(45.0));
    let lux = Script::new(Reading::Value(12_000.0));
    let air = Script::new(Reading::Fault(SensorFault::Bus));
    let mut lp = ControlLoop::new(
        &config,
        vec![
            ScriptedChannel::boxed("soil", Quantity::Moisture, &soil, &clock),
            ScriptedChannel::boxed("lux", Quantity::Illuminance, &lux, &clock),
            ScriptedChannel::boxed("air", Quantity::Temperature, &air, &clock),
        ],
        MockPump::new(),
        RecordingSink::new(),
        Arc::new(clock.clone()),
    )
    .unwrap();

    for t in 0..10 {
        clock.set(t * 1_000);
        lp.tick_settled(WAIT);
    }

    let snap = lp.feed().snapshot();
    assert_eq!(snap.len(), 3);
    assert_eq!(snap[&id("lux")].quality, Quality::Ok);
    assert_eq!(snap[&id("lux")].timestamp, 9_000);
    assert_eq!(snap[&id("air")].quality, Quality::Failed(SensorFault::Bus));
    assert_eq!(lux.reads(), 10);
    // Backoff: after 3 failures the air sensor is polled less often.
    assert!(air.reads() < 10);
}

#[test]
fn every_sensor_has_an_entry_after_the_first_cycle() {
    let config = config_with(vec![sensor_spec("lux", Quantity::Illuminance, 5_000)]);
    let clock = ManualClock::new(0);
    let soil = Script::new(Reading::Fault(SensorFault::Disconnected));
    let lux = Script::new(Reading::Value(500.0));
    let mut lp = ControlLoop::new(
        &config,
        vec![
            ScriptedChannel::boxed("soil", Quantity::Moisture, &soil, &clock),
            ScriptedChannel::boxed("lux", Quantity::Illuminance, &lux, &clock),
        ],
        MockPump::new(),
        RecordingSink::new(),
        Arc::new(clock),
    )
    .unwrap();

    lp.tick();
    let snap = lp.feed().snapshot();
    assert_eq!(snap.len(), 2);
    assert!(lp.store().missing().is_empty());
}

#[test]
fn channel_without_a_spec_is_rejected() {
    let config = config_with(Vec::new());
    let clock = ManualClock::new(0);
    let script = Script::new(Reading::Value(1.0));
    let result = ControlLoop::new(
        &config,
        vec![
            ScriptedChannel::boxed("soil", Quantity::Moisture, &script, &clock),
            ScriptedChannel::boxed("ghost", Quantity::Moisture, &script, &clock),
        ],
        MockPump::new(),
        RecordingSink::new(),
        Arc::new(clock),
    );
    assert!(matches!(result, Err(Error::Invariant(_))));
}

#[test]
fn invalid_thresholds_are_fatal_at_startup() {
    let mut config: SystemConfig = config_with(Vec::new());
    config.thresholds.moisture_low = 70.0;
    let clock = ManualClock::new(0);
    let script = Script::new(Reading::Value(1.0));
    let result = ControlLoop::new(
        &config,
        vec![ScriptedChannel::boxed("soil", Quantity::Moisture, &script, &clock)],
        MockPump::new(),
        RecordingSink::new(),
        Arc::new(clock),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

// ── Lifecycle ─────────────────────────────────────────────────

#[test]
fn run_stops_on_the_flag_and_switches_the_pump_off() {
    let mut r = rig();
    r.soil.set(Reading::Value(10.0));
    let stop = Arc::new(AtomicBool::new(false));
    let stopper = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::Release);
        })
    };

    let last = r.lp.run(&stop);
    stopper.join().unwrap();

    assert_eq!(last.commanded, Switch::Off);
    assert_eq!(r.pump.calls(), vec![Switch::On, Switch::Off]);
    assert!(matches!(r.sink.events().last(), Some(AppEvent::Stopped { .. })));
    // Shutdown is idempotent.
    assert_eq!(r.lp.shutdown(), last);
}

#[test]
fn telemetry_file_gets_one_record_per_event() {
    let path = std::env::temp_dir().join(format!("greenhouse-telemetry-{}.jsonl", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let config = config_with(Vec::new());
    let clock = ManualClock::new(0);
    let soil = Script::new(Reading::Value(20.0));
    let mut lp = ControlLoop::new(
        &config,
        vec![ScriptedChannel::boxed("soil", Quantity::Moisture, &soil, &clock)],
        MockPump::new(),
        JsonLinesSink::create(&path).unwrap(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    lp.tick_settled(WAIT);
    clock.set(1_000);
    lp.tick_settled(WAIT);
    lp.shutdown();
    drop(lp);

    let text = std::fs::read_to_string(&path).unwrap();
    let kinds: Vec<String> = text
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds.first().map(String::as_str), Some("started"));
    assert_eq!(kinds.last().map(String::as_str), Some("stopped"));
    assert!(kinds.iter().any(|k| k == "measurement"));
    assert!(kinds.iter().any(|k| k == "decision"));
    assert!(kinds.iter().any(|k| k == "actuator_applied"));
    std::fs::remove_file(&path).unwrap();
}
