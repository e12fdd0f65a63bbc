//! Actuator state owned by the control loop.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::measurement::{ActuatorId, Timestamp};

/// Binary actuator level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

/// Commanded state of the pump plus its transition history.
///
/// Only the control loop mutates this, and only after the driver confirms.
/// Consumers get clones through the state feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub actuator_id: ActuatorId,
    pub commanded: Switch,
    /// Time of the last confirmed transition.  `None` until the first one.
    pub last_transition_time: Option<Timestamp>,
    /// Consecutive apply attempts that were not confirmed.
    pub consecutive_command_count: u32,
    /// The last decision withheld actuation because moisture was untrusted.
    pub degraded: bool,
}

impl ActuatorState {
    /// A pump that is off and has never been switched.
    pub fn new(actuator_id: ActuatorId) -> Self {
        Self {
            actuator_id,
            commanded: Switch::Off,
            last_transition_time: None,
            consecutive_command_count: 0,
            degraded: false,
        }
    }

    /// Time spent in the current state, if it is known.
    pub fn time_in_state(&self, now: Timestamp) -> Option<u64> {
        self.last_transition_time.map(|t| now.saturating_sub(t))
    }

    pub(crate) fn record_confirmed(&mut self, target: Switch, now: Timestamp) {
        self.commanded = target;
        self.last_transition_time = Some(now);
        self.consecutive_command_count = 0;
    }

    /// Returns the new failure count.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_command_count = self.consecutive_command_count.saturating_add(1);
        self.consecutive_command_count
    }

    pub(crate) fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }
}
