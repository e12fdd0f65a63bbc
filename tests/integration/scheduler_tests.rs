//! Integration tests for the PollScheduler worker model.
//!
//! Real worker threads, scripted channels: a slow or dead sensor must never
//! hold back the others, and shutdown must stay bounded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use greenhouse::adapters::time::ManualClock;
use greenhouse::error::SensorFault;
use greenhouse::measurement::{Quality, Quantity, Value};
use greenhouse::scheduler::PollScheduler;
use greenhouse::state_store::StateStore;

use super::mock_hw::{Reading, Script, ScriptedChannel, id, sensor_spec};

const WAIT: Duration = Duration::from_secs(2);

struct Bench {
    scheduler: PollScheduler,
    store: Arc<StateStore>,
    clock: ManualClock,
    fast: Script,
    slow: Script,
    broken: Script,
}

fn bench() -> Bench {
    let specs = vec![
        sensor_spec("fast", Quantity::Humidity, 1_000),
        sensor_spec("slow", Quantity::Pressure, 1_000),
        sensor_spec("broken", Quantity::Temperature, 1_000),
    ];
    let clock = ManualClock::new(0);
    let fast = Script::new(Reading::Value(55.0));
    let slow = Script::new(Reading::Value(1_013.0));
    let broken = Script::new(Reading::Fault(SensorFault::Disconnected));
    let store = Arc::new(StateStore::new(specs.iter().map(|s| &s.id)));
    let scheduler = PollScheduler::new(
        vec![
            ScriptedChannel::boxed("fast", Quantity::Humidity, &fast, &clock),
            ScriptedChannel::boxed("slow", Quantity::Pressure, &slow, &clock),
            ScriptedChannel::boxed("broken", Quantity::Temperature, &broken, &clock),
        ],
        &specs,
        store.clone(),
    )
    .unwrap();
    Bench {
        scheduler,
        store,
        clock,
        fast,
        slow,
        broken,
    }
}

/// Wait until `script` has been read `n` times.
fn await_reads(script: &Script, n: u32) {
    let deadline = Instant::now() + WAIT;
    while script.reads() < n && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Keep polling at `now` until `script` has been read `n` times.
fn poll_until(scheduler: &mut PollScheduler, now: u64, script: &Script, n: u32) {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        scheduler.poll(now);
        if script.reads() >= n {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn slow_sensor_does_not_hold_back_the_others() {
    let mut b = bench();
    b.slow.set_delay(Duration::from_millis(800));

    for t in 0..5u64 {
        b.clock.set(t * 1_000);
        poll_until(&mut b.scheduler, t * 1_000, &b.fast, t as u32 + 1);
    }

    // The slow worker is still on its first read; the fast one kept going.
    assert_eq!(b.fast.reads(), 5);
    assert!(b.slow.reads() <= 1);
    assert_eq!(b.store.get(&id("fast")).unwrap().quality, Quality::Ok);
    b.scheduler.shutdown(WAIT);
}

#[test]
fn busy_sensor_is_never_queued_twice() {
    let mut b = bench();
    b.slow.set_delay(Duration::from_millis(300));
    let first = b.scheduler.poll(0);
    assert_eq!(first.dispatched.len(), 3);

    // Due again, but still in flight.
    let again = b.scheduler.poll(5_000);
    assert!(!again.dispatched.contains(&id("slow")));

    b.scheduler.settle(WAIT);
    assert_eq!(b.scheduler.in_flight(), 0);
    assert_eq!(b.slow.reads(), 1);
    b.scheduler.shutdown(WAIT);
}

#[test]
fn dead_sensor_backs_off_but_keeps_being_retried() {
    let mut b = bench();
    let mut now = 0;
    for _ in 0..6 {
        b.scheduler.poll(now);
        b.scheduler.settle(WAIT);
        now = b.scheduler.next_due(&id("broken")).unwrap();
    }
    assert_eq!(b.broken.reads(), 6);
    assert_eq!(b.scheduler.failures(&id("broken")), Some(6));
    // Default policy: threshold 3, ×2 per failure.
    assert_eq!(b.scheduler.effective_interval(&id("broken")), Some(16_000));
    assert_eq!(
        b.store.get(&id("broken")).unwrap().quality,
        Quality::Failed(SensorFault::Disconnected)
    );

    // Recovery resets the cadence.
    b.broken.set(Reading::Value(18.0));
    b.scheduler.poll(now);
    b.scheduler.settle(WAIT);
    assert_eq!(b.scheduler.failures(&id("broken")), Some(0));
    assert_eq!(b.scheduler.effective_interval(&id("broken")), Some(1_000));
    b.scheduler.shutdown(WAIT);
}

#[test]
fn completed_reads_are_reported_once() {
    let mut b = bench();
    b.scheduler.poll(0);
    let settled = b.scheduler.settle(WAIT);
    assert_eq!(settled.completed.len(), 3);
    assert!(b.scheduler.poll(10).completed.is_empty());
    b.scheduler.shutdown(WAIT);
}

#[test]
fn shutdown_abandons_a_stuck_worker_after_the_grace_period() {
    let mut b = bench();
    b.slow.set_delay(Duration::from_secs(3));
    b.scheduler.poll(0);
    await_reads(&b.fast, 1);

    let started = Instant::now();
    b.scheduler.shutdown(Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn hung_read_pins_only_its_own_worker_and_the_value_goes_stale() {
    let mut b = bench();
    b.scheduler.poll(0);
    b.scheduler.settle(WAIT);
    assert_eq!(b.store.get(&id("slow")).unwrap().quality, Quality::Ok);

    // The next pressure read does not come back for the rest of the test.
    b.slow.set_delay(Duration::from_secs(3));
    for t in 1..=4u64 {
        b.clock.set(t * 1_000);
        poll_until(&mut b.scheduler, t * 1_000, &b.fast, t as u32 + 1);
    }

    assert_eq!(b.fast.reads(), 5);
    assert_eq!(b.store.get(&id("fast")).unwrap().quality, Quality::Ok);
    let slow = b.store.get(&id("slow")).unwrap();
    assert_eq!(slow.quality, Quality::Stale);
    assert_eq!(slow.value, Some(Value::Pressure(1_013.0)));

    let started = Instant::now();
    b.scheduler.shutdown(Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
}
