//! Port traits: the boundary between the control core and the outside world.
//!
//! ```text
//!   SensorDevice ──▶ SensorChannel ──▶ PollScheduler ──▶ StateStore
//!                                                          │
//!   EventSink ◀── ControlLoop ◀── ControlPolicy ◀──────────┘
//!                     │
//!                     ▼
//!               ActuatorDriver
//! ```
//!
//! Driven adapters (sensor drivers, the pump relay, event sinks, clocks)
//! implement these traits.  The [`ControlLoop`](super::control_loop::ControlLoop)
//! consumes them through trait objects and generics, so the core never
//! touches a bus or a file directly.

use std::sync::Arc;

use crate::control::state::Switch;
use crate::error::{ActuatorError, SensorFault};
use crate::measurement::{Measurement, Quantity, SensorId, Timestamp, Value};

// ───────────────────────────────────────────────────────────────
// Sensor ports (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// One physical sensor as its vendor protocol sees it: read one value, may
/// fail.  Multi-step sequences (trigger, wait, fetch) happen inside
/// [`sample`](Self::sample) and must finish in bounded time.
pub trait SensorDevice: Send {
    /// Quantity every successful sample carries.
    fn quantity(&self) -> Quantity;

    fn sample(&mut self) -> Result<Value, SensorFault>;
}

impl<T: SensorDevice + ?Sized> SensorDevice for Box<T> {
    fn quantity(&self) -> Quantity {
        (**self).quantity()
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        (**self).sample()
    }
}

/// A configured sensor: read once, always get a [`Measurement`] back.
///
/// Failures come back as `Quality::Failed`, never as a panic or an `Err`.
/// A read that overruns the channel's timeout is reported as
/// `Failed(Timeout)` once the driver returns.
///
/// A driver call that never returns cannot be interrupted: it pins the
/// worker thread that owns the channel.  The scheduler stops dispatching to
/// that worker, the last good value ages to `Stale`, and shutdown abandons
/// the thread after the grace period.  Drivers keep their own blocking
/// bounded: the edge counter never waits on the line itself, and 1-wire and
/// I²C transfers are bounded by the kernel drivers.
pub trait SensorChannel: Send {
    fn id(&self) -> &SensorId;

    fn quantity(&self) -> Quantity;

    fn read(&mut self) -> Measurement;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Proof that the hardware reports the commanded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmed(pub Switch);

/// Write-side port for the irrigation pump.
pub trait ActuatorDriver {
    /// Drive the output and wait (bounded) for confirmation.
    fn apply(&mut self, target: Switch) -> Result<Confirmed, ActuatorError>;
}

impl<T: ActuatorDriver + ?Sized> ActuatorDriver for Box<T> {
    fn apply(&mut self, target: Switch) -> Result<Confirmed, ActuatorError> {
        (**self).apply(target)
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`AppEvent`](super::events::AppEvent)s through
/// this port.  Adapters decide where they go (log, JSON-lines file, both).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn emit(&mut self, event: &super::events::AppEvent) {
        (**self).emit(event);
    }
}

/// An absent sink drops every event.
impl<T: EventSink> EventSink for Option<T> {
    fn emit(&mut self, event: &super::events::AppEvent) {
        if let Some(sink) = self {
            sink.emit(event);
        }
    }
}

/// Fan-out: every event goes to both sinks, in order.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &super::events::AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock shared by the loop and the sensor workers.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

pub type SharedClock = Arc<dyn Clock>;
