//! Unified error types for the greenhouse controller.
//!
//! Sensor faults are not program errors: they travel inside a
//! [`Measurement`](crate::measurement::Measurement) as `Quality::Failed` and
//! never abort anything.  Actuator errors are retried by the control loop and
//! escalate only past the configured ceiling.  Configuration errors are fatal
//! at startup.  [`Error`] is the funnel for everything that can stop the
//! process from starting.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::measurement::DeviceId;

// ───────────────────────────────────────────────────────────────
// Top-level error
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// An actuator command failed.
    Actuator(ActuatorError),
    /// A worker thread or peripheral could not be brought up.
    Init(&'static str),
    /// An internal invariant was violated (programming defect).
    Invariant(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Invariant(msg) => write!(f, "invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ───────────────────────────────────────────────────────────────
// Sensor faults
// ───────────────────────────────────────────────────────────────

/// Why a single sensor read produced no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFault {
    /// The bus transaction itself failed (I2C NACK, read error).
    Bus,
    /// The read did not complete within `read_timeout`.
    Timeout,
    /// The response could not be parsed or had the wrong shape.
    Malformed,
    /// The sensor's own checksum rejected the frame.
    ChecksumMismatch,
    /// The value is outside the physically plausible range.
    OutOfRange,
    /// No pulses were counted during the sample window.
    NoSignal,
    /// The sensor reported its power-on / not-converted value.
    NotReady,
    /// The device is not present on its bus.
    Disconnected,
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "bus error"),
            Self::Timeout => write!(f, "read timed out"),
            Self::Malformed => write!(f, "malformed response"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::NoSignal => write!(f, "no signal"),
            Self::NotReady => write!(f, "sensor not ready"),
            Self::Disconnected => write!(f, "device disconnected"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorError {
    /// Driving the output pin failed.
    GpioWriteFailed,
    /// Reading the output state back failed.
    GpioReadFailed,
    /// The output never reported the commanded level.
    ConfirmTimeout,
    /// The actuator is not reachable at all.
    Disconnected,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
            Self::GpioReadFailed => write!(f, "GPIO read-back failed"),
            Self::ConfirmTimeout => write!(f, "confirmation timed out"),
            Self::Disconnected => write!(f, "actuator disconnected"),
        }
    }
}

impl std::error::Error for ActuatorError {}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ───────────────────────────────────────────────────────────────
// Safety faults
// ───────────────────────────────────────────────────────────────

/// Conditions tracked by the [`SafetySupervisor`](crate::safety::SafetySupervisor).
/// Several may be active at once; they are kept as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SafetyFault {
    /// The moisture reading driving the pump is failed, stale or missing.
    MoistureUntrusted = 0b0000_0001,
    /// The pump ran past its maximum on-time and was forced off.
    RunawayCutoff = 0b0000_0010,
    /// The last pump command was not confirmed.
    ActuatorFailing = 0b0000_0100,
    /// Unconfirmed commands exceeded the configured ceiling.
    ActuatorUnresponsive = 0b0000_1000,
}

impl SafetyFault {
    pub const ALL: [Self; 4] = [
        Self::MoistureUntrusted,
        Self::RunawayCutoff,
        Self::ActuatorFailing,
        Self::ActuatorUnresponsive,
    ];

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoistureUntrusted => write!(f, "moisture reading untrusted"),
            Self::RunawayCutoff => write!(f, "pump runaway cutoff"),
            Self::ActuatorFailing => write!(f, "pump command unconfirmed"),
            Self::ActuatorUnresponsive => write!(f, "pump unresponsive"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Configuration errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The config file is not valid JSON for [`SystemConfig`](crate::config::SystemConfig).
    Parse(String),
    /// An identifier is empty or longer than the bounded id capacity.
    InvalidId(String),
    /// Two sensors share an id.
    DuplicateSensor(DeviceId),
    /// The actuator references a sensor that is not configured.
    UnknownSensor(DeviceId),
    /// The referenced sensor does not produce soil moisture readings.
    NotAMoistureSensor(DeviceId),
    /// A hardware relay is bound to a simulated moisture source.
    SimulatedMoistureOnRelay(DeviceId),
    /// `moisture_low` must be strictly below `moisture_high`.
    ThresholdOrder { low: f32, high: f32 },
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// A sensor spec failed range validation.
    SensorInvalid(DeviceId, &'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read config: {msg}"),
            Self::Parse(msg) => write!(f, "cannot parse config: {msg}"),
            Self::InvalidId(id) => write!(f, "invalid identifier '{id}'"),
            Self::DuplicateSensor(id) => write!(f, "duplicate sensor id '{id}'"),
            Self::UnknownSensor(id) => write!(f, "unknown sensor '{id}'"),
            Self::NotAMoistureSensor(id) => {
                write!(f, "sensor '{id}' does not measure soil moisture")
            }
            Self::SimulatedMoistureOnRelay(id) => write!(
                f,
                "sensor '{id}' is simulated and cannot drive a hardware relay"
            ),
            Self::ThresholdOrder { low, high } => write!(
                f,
                "moisture_low ({low}) must be below moisture_high ({high})"
            ),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::SensorInvalid(id, msg) => write!(f, "sensor '{id}': {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ───────────────────────────────────────────────────────────────
// Convenience Result alias
// ───────────────────────────────────────────────────────────────

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
