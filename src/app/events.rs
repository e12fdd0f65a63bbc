//! Outbound application events.
//!
//! The [`ControlLoop`](super::control_loop::ControlLoop) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log them, append them to the
//! JSON-lines telemetry file, or both.

use serde::Serialize;

use crate::control::policy::Decision;
use crate::control::state::{ActuatorState, Switch};
use crate::error::ActuatorError;
use crate::measurement::{ActuatorId, Measurement, Timestamp};

/// Structured events emitted by the control loop.
///
/// Serialised with an `"event"` tag, one JSON object per telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// The loop is about to take its first tick.
    Started {
        at: Timestamp,
        sensors: usize,
        actuator: ActuatorId,
    },

    /// A sensor read finished (any quality).
    Measurement(Measurement),

    /// The policy ran.
    Decision { at: Timestamp, decision: Decision },

    /// The pump confirmed a new level.
    ActuatorApplied {
        at: Timestamp,
        actuator: ActuatorId,
        state: Switch,
    },

    /// A pump command was not confirmed.  The previous state is kept.
    ActuatorFailed {
        at: Timestamp,
        actuator: ActuatorId,
        target: Switch,
        error: ActuatorError,
        consecutive: u32,
    },

    /// Moisture data became untrusted, or trusted again.
    DegradedChanged { at: Timestamp, degraded: bool },

    /// The safety fault bitmask changed.
    FaultsChanged { at: Timestamp, faults: u8 },

    /// Actuation stopped for good; observation continues.
    Halted {
        at: Timestamp,
        reason: &'static str,
    },

    /// The loop shut down.  Carries the final actuator state.
    Stopped { at: Timestamp, actuator: ActuatorState },
}

impl AppEvent {
    /// When the event happened.
    pub fn at(&self) -> Timestamp {
        match self {
            Self::Measurement(m) => m.timestamp,
            Self::Started { at, .. }
            | Self::Decision { at, .. }
            | Self::ActuatorApplied { at, .. }
            | Self::ActuatorFailed { at, .. }
            | Self::DegradedChanged { at, .. }
            | Self::FaultsChanged { at, .. }
            | Self::Halted { at, .. }
            | Self::Stopped { at, .. } => *at,
        }
    }
}
