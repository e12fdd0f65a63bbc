//! Irrigation control policy.
//!
//! A pure function of (moisture reading, actuator history, thresholds, now).
//! Rules, highest priority first:
//!
//! ```text
//!   1. runaway cutoff   pump ON longer than max_on        → OFF
//!   2. untrusted input  moisture Failed / Stale / missing → no change, degraded
//!   3. hysteresis       OFF and < low → ON;  ON and > high → OFF
//!   4. minimum dwell    transition suppressed until min_off / min_on elapsed
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PolicyThresholds;
use crate::control::state::{ActuatorState, Switch};
use crate::error::ConfigError;
use crate::measurement::{Measurement, SensorId, Timestamp};
use crate::state_store::EnvironmentSnapshot;

// ───────────────────────────────────────────────────────────────
// Decision types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    On,
    Off,
    NoChange,
}

impl Command {
    /// The level this command asks for, if any.
    pub const fn target(self) -> Option<Switch> {
        match self {
            Self::On => Some(Switch::On),
            Self::Off => Some(Switch::Off),
            Self::NoChange => None,
        }
    }
}

impl From<Switch> for Command {
    fn from(s: Switch) -> Self {
        match s {
            Switch::On => Self::On,
            Switch::Off => Self::Off,
        }
    }
}

/// Which rule produced a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    SafetyCutoff,
    SensorUntrusted,
    DwellSuppressed,
    Hysteresis,
    WithinBand,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SafetyCutoff => write!(f, "max on-time exceeded"),
            Self::SensorUntrusted => write!(f, "moisture reading untrusted"),
            Self::DwellSuppressed => write!(f, "minimum dwell not elapsed"),
            Self::Hysteresis => write!(f, "threshold crossed"),
            Self::WithinBand => write!(f, "within band"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub command: Command,
    /// Moisture data was not trustworthy this cycle.
    pub degraded: bool,
    pub reason: DecisionReason,
    /// The trusted moisture value the decision was based on.
    pub moisture: Option<f32>,
}

// ───────────────────────────────────────────────────────────────
// Policy
// ───────────────────────────────────────────────────────────────

/// Hysteresis policy bound to one moisture sensor.
#[derive(Debug, Clone)]
pub struct ControlPolicy {
    moisture_sensor: SensorId,
    thresholds: PolicyThresholds,
}

impl ControlPolicy {
    pub fn new(moisture_sensor: SensorId, thresholds: PolicyThresholds) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        Ok(Self {
            moisture_sensor,
            thresholds,
        })
    }

    pub fn moisture_sensor(&self) -> &SensorId {
        &self.moisture_sensor
    }

    pub fn thresholds(&self) -> &PolicyThresholds {
        &self.thresholds
    }

    pub fn decide(
        &self,
        snapshot: &EnvironmentSnapshot,
        actuator: &ActuatorState,
        now: Timestamp,
    ) -> Decision {
        decide(
            snapshot.get(&self.moisture_sensor),
            actuator,
            &self.thresholds,
            now,
        )
    }
}

/// Decide the pump command from the relevant moisture reading.
pub fn decide(
    moisture: Option<&Measurement>,
    actuator: &ActuatorState,
    thresholds: &PolicyThresholds,
    now: Timestamp,
) -> Decision {
    let trusted = moisture
        .filter(|m| m.is_trusted())
        .and_then(|m| m.value)
        .and_then(|v| v.moisture());
    let elapsed = actuator.time_in_state(now);

    // ── Runaway cutoff ────────────────────────────────────────
    if actuator.commanded == Switch::On
        && elapsed.is_none_or(|e| e > thresholds.max_on_ms())
    {
        return Decision {
            command: Command::Off,
            degraded: trusted.is_none(),
            reason: DecisionReason::SafetyCutoff,
            moisture: trusted,
        };
    }

    // ── Untrusted input ───────────────────────────────────────
    let Some(level) = trusted else {
        return Decision {
            command: Command::NoChange,
            degraded: true,
            reason: DecisionReason::SensorUntrusted,
            moisture: None,
        };
    };

    // ── Hysteresis ────────────────────────────────────────────
    let wanted = match actuator.commanded {
        Switch::Off if level < thresholds.moisture_low => Some(Switch::On),
        Switch::On if level > thresholds.moisture_high => Some(Switch::Off),
        _ => None,
    };
    let Some(target) = wanted else {
        return Decision {
            command: Command::NoChange,
            degraded: false,
            reason: DecisionReason::WithinBand,
            moisture: Some(level),
        };
    };

    // ── Minimum dwell ─────────────────────────────────────────
    let dwell = match target {
        Switch::On => thresholds.min_off_ms(),
        Switch::Off => thresholds.min_on_ms(),
    };
    if elapsed.is_some_and(|e| e < dwell) {
        return Decision {
            command: Command::NoChange,
            degraded: false,
            reason: DecisionReason::DwellSuppressed,
            moisture: Some(level),
        };
    }

    Decision {
        command: target.into(),
        degraded: false,
        reason: DecisionReason::Hysteresis,
        moisture: Some(level),
    }
}
