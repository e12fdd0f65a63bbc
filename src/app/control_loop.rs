//! Control loop, the only writer of the actuator state.
//!
//! [`ControlLoop`] owns the poll scheduler, the policy, the safety
//! supervisor and the pump driver.  Every tick walks the phase machine:
//!
//! ```text
//!  Idle ──▶ Polling ──▶ Deciding ──▶ Actuating ──▶ Idle
//!            │             │              │
//!      PollScheduler   ControlPolicy   ActuatorDriver
//!            │             │              │
//!            └─────────────┴──────────────┴──▶ EventSink · StateFeed
//! ```
//!
//! Once actuator failures escalate the loop parks in `Halted`: sensors keep
//! being polled and published, the pump is never commanded again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::SystemConfig;
use crate::control::policy::{ControlPolicy, Decision};
use crate::control::state::{ActuatorState, Switch};
use crate::error::{Error, SensorFault};
use crate::fsm::{LoopPhase, PhaseMachine};
use crate::measurement::{Measurement, Timestamp};
use crate::safety::SafetySupervisor;
use crate::scheduler::{PollReport, PollScheduler};
use crate::state_store::StateStore;

use super::events::AppEvent;
use super::feed::StateFeed;
use super::ports::{ActuatorDriver, Confirmed, EventSink, SensorChannel, SharedClock};

/// Longest single sleep inside `run`, so a shutdown request is seen quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Extra time the first cycle waits on top of the slowest read timeout.
const FIRST_CYCLE_SLACK: Duration = Duration::from_millis(250);

// ───────────────────────────────────────────────────────────────
// ControlLoop
// ───────────────────────────────────────────────────────────────

pub struct ControlLoop<A, S> {
    scheduler: PollScheduler,
    store: Arc<StateStore>,
    policy: ControlPolicy,
    safety: SafetySupervisor,
    phases: PhaseMachine,
    actuator: A,
    state: ActuatorState,
    sink: S,
    clock: SharedClock,
    feed: StateFeed,
    tick_interval: Duration,
    shutdown_grace: Duration,
    /// How long the first cycle waits for every sensor to report once.
    first_cycle_wait: Duration,
    first_cycle_done: bool,
    started: bool,
    stopped: bool,
    last_faults: u8,
}

impl<A: ActuatorDriver, S: EventSink> ControlLoop<A, S> {
    /// Validate `config`, spawn the sensor workers and take ownership of the
    /// pump.  `channels` must hold exactly one channel per configured sensor.
    pub fn new(
        config: &SystemConfig,
        channels: Vec<Box<dyn SensorChannel>>,
        actuator: A,
        sink: S,
        clock: SharedClock,
    ) -> Result<Self, Error> {
        config.validate()?;
        let policy = ControlPolicy::new(
            config.actuator.moisture_sensor.clone(),
            config.thresholds,
        )?;

        let store = Arc::new(StateStore::new(config.sensors.iter().map(|s| &s.id)));
        let scheduler = PollScheduler::new(channels, &config.sensors, store.clone())?;
        if scheduler.len() != config.sensors.len() {
            return Err(Error::Invariant("every configured sensor needs a channel"));
        }

        let state = ActuatorState::new(config.actuator.id.clone());
        let feed = StateFeed::new(store.clone(), state.clone());
        let slowest_read = config
            .sensors
            .iter()
            .map(|s| s.read_timeout_ms)
            .max()
            .unwrap_or(0);

        Ok(Self {
            scheduler,
            store,
            policy,
            safety: SafetySupervisor::new(&config.actuator),
            phases: PhaseMachine::new(),
            actuator,
            state,
            sink,
            clock,
            feed,
            tick_interval: Duration::from_millis(u64::from(config.control_loop_interval_ms)),
            shutdown_grace: Duration::from_millis(u64::from(config.shutdown_grace_ms)),
            first_cycle_wait: Duration::from_millis(u64::from(slowest_read)) + FIRST_CYCLE_SLACK,
            first_cycle_done: false,
            started: false,
            stopped: false,
            last_faults: 0,
        })
    }

    // ── Queries ───────────────────────────────────────────────

    /// Handle for display consumers.
    pub fn feed(&self) -> StateFeed {
        self.feed.clone()
    }

    pub fn actuator_state(&self) -> &ActuatorState {
        &self.state
    }

    pub fn phase(&self) -> LoopPhase {
        self.phases.current()
    }

    pub fn is_halted(&self) -> bool {
        self.phases.is_halted()
    }

    pub fn fault_flags(&self) -> u8 {
        self.safety.faults()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One control cycle.  Never waits on a sensor: the decision uses
    /// whatever the store holds when the cycle reaches `Deciding`.
    ///
    /// Returns the policy decision, or `None` once halted.
    pub fn tick(&mut self) -> Option<Decision> {
        self.cycle(None)
    }

    /// Like [`tick`](Self::tick), but waits up to `wait` for the reads
    /// dispatched this cycle so the decision sees them.  For replays and
    /// tests.
    pub fn tick_settled(&mut self, wait: Duration) -> Option<Decision> {
        self.cycle(Some(wait))
    }

    fn cycle(&mut self, settle: Option<Duration>) -> Option<Decision> {
        let now = self.clock.now_ms();
        if !self.started {
            self.started = true;
            info!(
                "Control loop started: {} sensors, pump '{}'",
                self.store.len(),
                self.state.actuator_id
            );
            self.sink.emit(&AppEvent::Started {
                at: now,
                sensors: self.store.len(),
                actuator: self.state.actuator_id.clone(),
            });
        }

        // 1. Poll
        if !self.phases.is_halted() {
            self.phases.transition(LoopPhase::Polling);
        }
        let mut report = self.scheduler.poll(now);
        if let Some(wait) = settle {
            let settled = self.scheduler.settle(wait);
            report.completed.extend(settled.completed);
        }
        if !self.first_cycle_done {
            self.complete_first_cycle(now, &mut report);
        }
        self.emit_measurements(report);

        if self.phases.is_halted() {
            self.publish();
            return None;
        }

        // 2. Decide
        self.phases.transition(LoopPhase::Deciding);
        let snapshot = self.store.snapshot();
        let decision = self.policy.decide(&snapshot, &self.state, now);
        debug!(
            "Decision: {:?} ({}), moisture={:?}",
            decision.command, decision.reason, decision.moisture
        );
        self.sink.emit(&AppEvent::Decision { at: now, decision });
        self.track_degraded(decision.degraded, now);
        self.safety.observe_decision(&decision);

        // 3. Actuate
        match decision.command.target().filter(|t| *t != self.state.commanded) {
            Some(target) => {
                self.phases.transition(LoopPhase::Actuating);
                self.actuate(target, now, &decision);
                if !self.phases.is_halted() {
                    self.phases.transition(LoopPhase::Idle);
                }
            }
            None => {
                self.phases.transition(LoopPhase::Idle);
            }
        }

        self.track_faults(now);
        self.publish();
        Some(decision)
    }

    /// Tick at the configured cadence until `stop` is set, then shut down.
    pub fn run(&mut self, stop: &AtomicBool) -> ActuatorState {
        info!(
            "Control loop running every {} ms",
            self.tick_interval.as_millis()
        );
        let mut next = Instant::now();
        while !stop.load(Ordering::Acquire) {
            self.tick();

            next += self.tick_interval;
            let now = Instant::now();
            if now > next + self.tick_interval {
                debug!("Control loop overran by {} ms", (now - next).as_millis());
                next = now;
            }
            while !stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= next {
                    break;
                }
                std::thread::sleep((next - now).min(SLEEP_SLICE));
            }
        }
        info!("Control loop: shutdown requested");
        self.shutdown()
    }

    /// Stop the sensor workers, switch a running pump off (unless halted)
    /// and return the final actuator state.  Idempotent.
    pub fn shutdown(&mut self) -> ActuatorState {
        if self.stopped {
            return self.state.clone();
        }
        self.stopped = true;

        let report = self.scheduler.shutdown(self.shutdown_grace);
        self.emit_measurements(report);

        let now = self.clock.now_ms();
        if self.state.commanded.is_on() && !self.phases.is_halted() {
            match self.actuator.apply(Switch::Off) {
                Ok(Confirmed(_)) => {
                    self.state.record_confirmed(Switch::Off, now);
                    info!("Pump '{}': OFF on shutdown", self.state.actuator_id);
                    self.sink.emit(&AppEvent::ActuatorApplied {
                        at: now,
                        actuator: self.state.actuator_id.clone(),
                        state: Switch::Off,
                    });
                }
                Err(e) => warn!(
                    "Pump '{}': OFF on shutdown not confirmed ({e}), it may still be running",
                    self.state.actuator_id
                ),
            }
        }

        self.sink.emit(&AppEvent::Stopped {
            at: now,
            actuator: self.state.clone(),
        });
        self.publish();
        info!(
            "Control loop stopped after {} cycles, pump {}",
            self.phases.cycles(),
            self.state.commanded
        );
        self.state.clone()
    }

    // ── Internal ──────────────────────────────────────────────

    /// Apply `target` and fold the outcome into the actuator state.
    fn actuate(&mut self, target: Switch, now: Timestamp, decision: &Decision) {
        match self.actuator.apply(target) {
            Ok(Confirmed(level)) => {
                debug_assert_eq!(level, target, "driver confirmed a different level");
                self.state.record_confirmed(target, now);
                info!(
                    "Pump '{}': {target} ({})",
                    self.state.actuator_id, decision.reason
                );
                self.sink.emit(&AppEvent::ActuatorApplied {
                    at: now,
                    actuator: self.state.actuator_id.clone(),
                    state: target,
                });
                self.safety.observe_actuation(0);
            }
            Err(e) => {
                let failures = self.state.record_failure();
                warn!(
                    "Pump '{}': {target} failed ({e}), attempt {failures}, keeping {}",
                    self.state.actuator_id, self.state.commanded
                );
                self.sink.emit(&AppEvent::ActuatorFailed {
                    at: now,
                    actuator: self.state.actuator_id.clone(),
                    target,
                    error: e,
                    consecutive: failures,
                });
                if self.safety.observe_actuation(failures) {
                    error!(
                        "Pump '{}': {failures} consecutive failures, halting actuation",
                        self.state.actuator_id
                    );
                    self.phases.transition(LoopPhase::Halted);
                    self.sink.emit(&AppEvent::Halted {
                        at: now,
                        reason: "pump unresponsive",
                    });
                }
            }
        }
    }

    /// Wait for every sensor to report once, then check that each one has an
    /// entry.  A sensor that did not answer in time is recorded as timed out.
    fn complete_first_cycle(&mut self, now: Timestamp, report: &mut PollReport) {
        self.first_cycle_done = true;
        let settled = self.scheduler.settle(self.first_cycle_wait);
        report.completed.extend(settled.completed);

        for id in self.store.missing() {
            warn!("Sensor '{id}': no reading after the first poll cycle");
            let m = Measurement::failed(id, SensorFault::Timeout, now);
            self.store.update(m.clone());
            report.completed.push(m);
        }

        let missing = self.store.missing();
        if !missing.is_empty() {
            error!("Snapshot incomplete after the first poll cycle: {missing:?}");
            debug_assert!(false, "snapshot missing {missing:?}");
        }
    }

    fn emit_measurements(&mut self, report: PollReport) {
        for m in report.completed {
            self.sink.emit(&AppEvent::Measurement(m));
        }
    }

    fn track_degraded(&mut self, degraded: bool, now: Timestamp) {
        if degraded == self.state.degraded {
            return;
        }
        if degraded {
            warn!(
                "Moisture sensor '{}' untrusted, pump commands withheld",
                self.policy.moisture_sensor()
            );
        } else {
            info!(
                "Moisture sensor '{}' trusted again",
                self.policy.moisture_sensor()
            );
        }
        self.state.set_degraded(degraded);
        self.sink.emit(&AppEvent::DegradedChanged { at: now, degraded });
    }

    fn track_faults(&mut self, now: Timestamp) {
        let faults = self.safety.faults();
        if faults != self.last_faults {
            self.last_faults = faults;
            self.sink.emit(&AppEvent::FaultsChanged { at: now, faults });
        }
    }

    fn publish(&self) {
        self.feed
            .publish(self.phases.current(), self.safety.faults(), &self.state);
    }
}
