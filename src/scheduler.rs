//! Per-sensor poll scheduler.
//!
//! Every sensor channel lives on its own worker thread.  The scheduler keeps
//! one arena entry per channel with its next due time and failure count,
//! and on every `poll(now)` dispatches the reads that are due.  A slow or
//! dead sensor only ever blocks its own worker.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  PollScheduler (control-loop thread)                         │
//! │   arena: [ id · next_due · failures · in_flight ] × N        │
//! │        │ Read / Stop (depth 1)            ▲ ReadOutcome      │
//! │        ▼                                  │                  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐              │
//! │  │ sensor-a   │  │ sensor-b   │  │ sensor-c   │  workers     │
//! │  │ read()     │  │ read()     │  │ read()     │              │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘              │
//! │        └───────────────┴──── update ───┴──▶ StateStore       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The request channel holds one message, so a busy sensor is never queued a
//! second read.  The next attempt is scheduled from the dispatch time of the
//! previous one, stretched by the sensor's backoff policy after repeated
//! failures.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future::block_on;
use log::{debug, info, warn};

use crate::app::ports::SensorChannel;
use crate::config::{BackoffPolicy, MAX_SENSORS, SensorSpec};
use crate::error::Error;
use crate::measurement::{Measurement, SensorId, Timestamp};
use crate::state_store::StateStore;

/// How often `settle` and `shutdown` re-check their workers.
const SETTLE_SLICE: Duration = Duration::from_millis(2);

// ═══════════════════════════════════════════════════════════════
//  Worker messaging
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerMsg {
    Read,
    Stop,
}

struct ReadOutcome {
    slot: usize,
    measurement: Measurement,
}

type RequestChannel = Channel<CriticalSectionRawMutex, WorkerMsg, 1>;
type OutcomeChannel = Channel<CriticalSectionRawMutex, ReadOutcome, MAX_SENSORS>;

fn worker(
    slot: usize,
    mut channel: Box<dyn SensorChannel>,
    requests: Arc<RequestChannel>,
    outcomes: Arc<OutcomeChannel>,
    store: Arc<StateStore>,
) {
    loop {
        match block_on(requests.receive()) {
            WorkerMsg::Read => {
                let measurement = channel.read();
                store.update(measurement.clone());
                // At most one outcome per slot is outstanding, so this
                // never waits.
                block_on(outcomes.send(ReadOutcome { slot, measurement }));
            }
            WorkerMsg::Stop => break,
        }
    }
    debug!("Sensor worker '{}' stopped", channel.id());
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// What one `poll` observed.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Sensors a read was sent to.
    pub dispatched: Vec<SensorId>,
    /// Reads that finished since the last poll, in completion order.
    pub completed: Vec<Measurement>,
    /// Sensors whose last good reading just went stale.
    pub marked_stale: Vec<SensorId>,
}

/// Internal bookkeeping for one channel.
struct ScheduledEntry {
    id: SensorId,
    poll_interval_ms: u32,
    backoff: BackoffPolicy,
    stale_after_ms: u64,
    next_due: Timestamp,
    dispatched_at: Option<Timestamp>,
    failures: u32,
    in_flight: bool,
    requests: Arc<RequestChannel>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledEntry {
    fn effective_interval(&self) -> u64 {
        self.backoff.interval_for(self.poll_interval_ms, self.failures)
    }
}

pub struct PollScheduler {
    arena: heapless::Vec<ScheduledEntry, MAX_SENSORS>,
    outcomes: Arc<OutcomeChannel>,
    store: Arc<StateStore>,
}

impl PollScheduler {
    /// Spawn one worker per channel.  Every channel must have a spec with the
    /// same id.
    pub fn new(
        channels: Vec<Box<dyn SensorChannel>>,
        specs: &[SensorSpec],
        store: Arc<StateStore>,
    ) -> Result<Self, Error> {
        let mut scheduler = Self {
            arena: heapless::Vec::new(),
            outcomes: Arc::new(Channel::new()),
            store,
        };

        for channel in channels {
            let spec = specs
                .iter()
                .find(|s| &s.id == channel.id())
                .ok_or(Error::Invariant("sensor channel without a spec"))?;
            let slot = scheduler.arena.len();
            if slot >= MAX_SENSORS {
                return Err(Error::Init("too many sensors for the scheduler arena"));
            }

            let requests = Arc::new(RequestChannel::new());
            let handle = {
                let requests = requests.clone();
                let outcomes = scheduler.outcomes.clone();
                let store = scheduler.store.clone();
                std::thread::Builder::new()
                    .name(format!("sensor-{}", spec.id))
                    .spawn(move || worker(slot, channel, requests, outcomes, store))
                    .map_err(|_| Error::Init("cannot spawn sensor worker"))?
            };

            let entry = ScheduledEntry {
                id: spec.id.clone(),
                poll_interval_ms: spec.poll_interval_ms,
                backoff: spec.backoff,
                stale_after_ms: spec.stale_after_ms(),
                next_due: 0,
                dispatched_at: None,
                failures: 0,
                in_flight: false,
                requests,
                handle: Some(handle),
            };
            if scheduler.arena.push(entry).is_err() {
                return Err(Error::Init("too many sensors for the scheduler arena"));
            }
            info!("Scheduler: '{}' at slot {}", spec.id, slot);
        }
        Ok(scheduler)
    }

    /// Collect finished reads, mark stale entries, dispatch due reads.
    /// Never blocks on a sensor.
    pub fn poll(&mut self, now: Timestamp) -> PollReport {
        let mut report = PollReport::default();
        self.drain(&mut report);

        for entry in self.arena.iter_mut() {
            if self.store.mark_stale(&entry.id, now, entry.stale_after_ms) {
                warn!(
                    "Sensor '{}': no good reading for {} ms, marked stale",
                    entry.id, entry.stale_after_ms
                );
                report.marked_stale.push(entry.id.clone());
            }

            if entry.in_flight || now < entry.next_due {
                continue;
            }
            match entry.requests.try_send(WorkerMsg::Read) {
                Ok(()) => {
                    entry.in_flight = true;
                    entry.dispatched_at = Some(now);
                    report.dispatched.push(entry.id.clone());
                }
                Err(_) => debug!("Sensor '{}': worker busy, read deferred", entry.id),
            }
        }
        report
    }

    /// Wait up to `wait` for in-flight reads to finish without dispatching
    /// new ones.
    pub fn settle(&mut self, wait: Duration) -> PollReport {
        let deadline = Instant::now() + wait;
        let mut report = PollReport::default();
        loop {
            self.drain(&mut report);
            if self.in_flight() == 0 || Instant::now() >= deadline {
                return report;
            }
            std::thread::sleep(SETTLE_SLICE);
        }
    }

    /// Let in-flight reads finish, stop every worker and join it.  Workers
    /// still busy after `grace` are abandoned.
    pub fn shutdown(&mut self, grace: Duration) -> PollReport {
        let deadline = Instant::now() + grace;
        let report = self.settle(grace);

        for entry in self.arena.iter_mut() {
            while entry.requests.try_send(WorkerMsg::Stop).is_err() && Instant::now() < deadline {
                std::thread::sleep(SETTLE_SLICE);
            }
        }

        for entry in self.arena.iter_mut() {
            let Some(handle) = entry.handle.take() else {
                continue;
            };
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(SETTLE_SLICE);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Sensor worker '{}' panicked", entry.id);
                }
            } else {
                warn!(
                    "Sensor worker '{}' still busy after {} ms, abandoning it",
                    entry.id,
                    grace.as_millis()
                );
            }
        }
        info!("Scheduler: all sensor workers stopped");
        report
    }

    /// Reads dispatched but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.arena.iter().filter(|e| e.in_flight).count()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Consecutive failed reads of `id`.
    pub fn failures(&self, id: &SensorId) -> Option<u32> {
        self.entry(id).map(|e| e.failures)
    }

    /// When `id` is next due.
    pub fn next_due(&self, id: &SensorId) -> Option<Timestamp> {
        self.entry(id).map(|e| e.next_due)
    }

    /// Current interval of `id`, including backoff.
    pub fn effective_interval(&self, id: &SensorId) -> Option<u64> {
        self.entry(id).map(ScheduledEntry::effective_interval)
    }

    // ── Internal ──────────────────────────────────────────────────

    fn entry(&self, id: &SensorId) -> Option<&ScheduledEntry> {
        self.arena.iter().find(|e| &e.id == id)
    }

    fn drain(&mut self, report: &mut PollReport) {
        while let Ok(ReadOutcome { slot, measurement }) = self.outcomes.try_receive() {
            let Some(entry) = self.arena.get_mut(slot) else {
                debug_assert!(false, "outcome for unknown slot {slot}");
                continue;
            };
            entry.in_flight = false;

            if measurement.is_trusted() {
                if entry.failures >= entry.backoff.failure_threshold {
                    info!(
                        "Sensor '{}': recovered after {} failures",
                        entry.id, entry.failures
                    );
                }
                entry.failures = 0;
            } else {
                entry.failures = entry.failures.saturating_add(1);
                if entry.failures == entry.backoff.failure_threshold {
                    warn!(
                        "Sensor '{}': {} consecutive failures, backing off ({})",
                        entry.id, entry.failures, measurement
                    );
                }
            }

            let from = entry.dispatched_at.unwrap_or(measurement.timestamp);
            entry.next_due = from.saturating_add(entry.effective_interval());
            report.completed.push(measurement);
        }
    }
}

impl Drop for PollScheduler {
    /// Workers not stopped through `shutdown` are told to stop and detached.
    fn drop(&mut self) {
        for entry in self.arena.iter_mut() {
            if entry.handle.take().is_some() {
                let _ = entry.requests.try_send(WorkerMsg::Stop);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
