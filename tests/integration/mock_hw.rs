//! Mock hardware for integration tests.
//!
//! Sensor channels read from a shared script, the pump records every
//! command, and the event sink keeps every event, so tests can drive and
//! inspect the control loop without a bus or a relay.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use greenhouse::adapters::time::ManualClock;
use greenhouse::app::AppEvent;
use greenhouse::app::ports::{ActuatorDriver, Clock, Confirmed, EventSink, SensorChannel};
use greenhouse::config::{ActuatorOutput, ActuatorSpec, BackoffPolicy, BusDescriptor, SensorSpec, SystemConfig};
use greenhouse::control::Switch;
use greenhouse::error::{ActuatorError, SensorFault};
use greenhouse::measurement::{DeviceId, Measurement, Quantity, SensorId, Value};

// ── Configuration helpers ─────────────────────────────────────

pub fn id(s: &str) -> SensorId {
    DeviceId::new(s).unwrap()
}

pub fn sensor_spec(name: &str, quantity: Quantity, poll_interval_ms: u32) -> SensorSpec {
    SensorSpec {
        id: id(name),
        bus: BusDescriptor::Simulated {
            quantity,
            base: 0.0,
            amplitude: 0.0,
            period_secs: 0,
            irrigated: false,
            fail_every: 0,
        },
        poll_interval_ms,
        read_timeout_ms: 500,
        backoff: BackoffPolicy::default(),
    }
}

/// One pump bound to `soil`, plus whatever extra sensors are given.
pub fn config_with(extra: Vec<SensorSpec>) -> SystemConfig {
    let mut sensors = vec![sensor_spec("soil", Quantity::Moisture, 1_000)];
    sensors.extend(extra);
    SystemConfig {
        control_loop_interval_ms: 50,
        shutdown_grace_ms: 1_000,
        sensors,
        thresholds: Default::default(),
        actuator: ActuatorSpec {
            id: id("pump"),
            moisture_sensor: id("soil"),
            output: ActuatorOutput::Simulated,
            confirm_timeout_ms: 50,
            max_consecutive_failures: 3,
        },
        telemetry_path: None,
    }
}

// ── Scripted sensor channel ───────────────────────────────────

/// What the next read returns.
#[derive(Debug, Clone, Copy)]
pub enum Reading {
    Value(f32),
    Fault(SensorFault),
}

#[derive(Clone)]
pub struct Script {
    pub reading: Arc<Mutex<Reading>>,
    pub reads: Arc<AtomicU32>,
    pub delay: Arc<Mutex<Duration>>,
}

#[allow(dead_code)]
impl Script {
    pub fn new(reading: Reading) -> Self {
        Self {
            reading: Arc::new(Mutex::new(reading)),
            reads: Arc::new(AtomicU32::new(0)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn set(&self, reading: Reading) {
        *self.reading.lock().unwrap() = reading;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

pub struct ScriptedChannel {
    id: SensorId,
    quantity: Quantity,
    script: Script,
    clock: ManualClock,
}

impl ScriptedChannel {
    pub fn boxed(name: &str, quantity: Quantity, script: &Script, clock: &ManualClock) -> Box<dyn SensorChannel> {
        Box::new(Self {
            id: id(name),
            quantity,
            script: script.clone(),
            clock: clock.clone(),
        })
    }
}

impl SensorChannel for ScriptedChannel {
    fn id(&self) -> &SensorId {
        &self.id
    }

    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn read(&mut self) -> Measurement {
        let delay = *self.script.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now_ms();
        match *self.script.reading.lock().unwrap() {
            Reading::Value(v) => Measurement::ok(self.id.clone(), Value::of(self.quantity, v), now),
            Reading::Fault(f) => Measurement::failed(self.id.clone(), f, now),
        }
    }
}

// ── Mock pump ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockPump {
    pub calls: Arc<Mutex<Vec<Switch>>>,
    pub failing: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl MockPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Switch> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> Option<Switch> {
        self.calls.lock().unwrap().last().copied()
    }
}

impl ActuatorDriver for MockPump {
    fn apply(&mut self, target: Switch) -> Result<Confirmed, ActuatorError> {
        self.calls.lock().unwrap().push(target);
        if self.failing.load(Ordering::SeqCst) {
            Err(ActuatorError::ConfirmTimeout)
        } else {
            Ok(Confirmed(target))
        }
    }
}

// ── Recording sink ────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<AppEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
