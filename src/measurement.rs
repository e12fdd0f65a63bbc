//! Measurement domain model.
//!
//! A [`Measurement`] is the unit of data that flows from a sensor channel into
//! the state store and out to consumers.  It is immutable once produced: the
//! store replaces entries, it never edits them in place.
//!
//! The sensor set is small and hardware-fixed, so the value is a closed enum
//! ([`Value`]) rather than an open trait hierarchy.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SensorFault};

/// Milliseconds on the process's monotonic clock.
pub type Timestamp = u64;

/// Capacity of a [`DeviceId`] in bytes.
pub const DEVICE_ID_CAP: usize = 32;

// ───────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────

/// Bounded identifier for a sensor or actuator (e.g. `"bed-1-moisture"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(heapless::String<DEVICE_ID_CAP>);

pub type SensorId = DeviceId;
pub type ActuatorId = DeviceId;

impl DeviceId {
    /// Build an identifier.  Rejects empty strings and strings longer than
    /// [`DEVICE_ID_CAP`] bytes.
    pub fn new(id: &str) -> Result<Self, ConfigError> {
        if id.is_empty() {
            return Err(ConfigError::InvalidId(id.into()));
        }
        let mut s = heapless::String::new();
        s.push_str(id)
            .map_err(|()| ConfigError::InvalidId(id.into()))?;
        Ok(Self(s))
    }

    /// Build an identifier from a trusted literal, truncating at the
    /// capacity.  Used for built-in defaults only.
    pub(crate) fn lossy(id: &str) -> Self {
        let mut s = heapless::String::new();
        for c in id.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────
// Values
// ───────────────────────────────────────────────────────────────

/// Physical quantity a sensor channel produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Moisture,
    Illuminance,
    Pressure,
    Humidity,
    Temperature,
}

impl Quantity {
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Moisture => "%",
            Self::Illuminance => "lx",
            Self::Pressure => "hPa",
            Self::Humidity => "%RH",
            Self::Temperature => "\u{00b0}C",
        }
    }

    /// Physically plausible range for this quantity.  Values outside it are
    /// reported as [`SensorFault::OutOfRange`].
    pub const fn plausible_range(self) -> (f32, f32) {
        match self {
            Self::Moisture | Self::Humidity => (0.0, 100.0),
            Self::Illuminance => (0.0, 200_000.0),
            Self::Pressure => (300.0, 1100.0),
            Self::Temperature => (-55.0, 125.0),
        }
    }
}

/// A typed reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "quantity", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Volumetric soil moisture, percent.
    Moisture(f32),
    /// Illuminance, lux.
    Illuminance(f32),
    /// Barometric pressure, hPa.
    Pressure(f32),
    /// Relative humidity, percent.
    Humidity(f32),
    /// Temperature, degrees Celsius.
    Temperature(f32),
}

impl Value {
    pub const fn quantity(&self) -> Quantity {
        match self {
            Self::Moisture(_) => Quantity::Moisture,
            Self::Illuminance(_) => Quantity::Illuminance,
            Self::Pressure(_) => Quantity::Pressure,
            Self::Humidity(_) => Quantity::Humidity,
            Self::Temperature(_) => Quantity::Temperature,
        }
    }

    /// The bare number, in the unit of [`Value::quantity`].
    pub const fn raw(&self) -> f32 {
        match *self {
            Self::Moisture(v)
            | Self::Illuminance(v)
            | Self::Pressure(v)
            | Self::Humidity(v)
            | Self::Temperature(v) => v,
        }
    }

    /// Build a value of the given quantity.
    pub const fn of(quantity: Quantity, raw: f32) -> Self {
        match quantity {
            Quantity::Moisture => Self::Moisture(raw),
            Quantity::Illuminance => Self::Illuminance(raw),
            Quantity::Pressure => Self::Pressure(raw),
            Quantity::Humidity => Self::Humidity(raw),
            Quantity::Temperature => Self::Temperature(raw),
        }
    }

    /// Soil moisture percentage, if this is a moisture value.
    pub const fn moisture(&self) -> Option<f32> {
        match *self {
            Self::Moisture(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}{}", self.raw(), self.quantity().unit())
    }
}

// ───────────────────────────────────────────────────────────────
// Quality
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Quality {
    Ok,
    /// The last good reading is older than the freshness bound.
    Stale,
    Failed(SensorFault),
}

impl Quality {
    /// Only fresh, successful readings may drive actuation.
    pub const fn is_trusted(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

// ───────────────────────────────────────────────────────────────
// Measurement
// ───────────────────────────────────────────────────────────────

/// One reading of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: SensorId,
    /// `None` only for a failed read that produced no data.
    pub value: Option<Value>,
    pub timestamp: Timestamp,
    pub quality: Quality,
}

impl Measurement {
    pub fn ok(sensor_id: SensorId, value: Value, timestamp: Timestamp) -> Self {
        Self {
            sensor_id,
            value: Some(value),
            timestamp,
            quality: Quality::Ok,
        }
    }

    pub fn failed(sensor_id: SensorId, fault: SensorFault, timestamp: Timestamp) -> Self {
        Self {
            sensor_id,
            value: None,
            timestamp,
            quality: Quality::Failed(fault),
        }
    }

    /// A copy of this measurement downgraded to [`Quality::Stale`].  Value and
    /// timestamp are kept so consumers can still show the last known reading.
    pub fn to_stale(&self) -> Self {
        Self {
            quality: Quality::Stale,
            ..self.clone()
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.quality.is_trusted() && self.value.is_some()
    }

    /// Age relative to `now`, saturating at zero for clock skew.
    pub fn age(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, &self.quality) {
            (Some(v), Quality::Ok) => write!(f, "{}={v}", self.sensor_id),
            (Some(v), Quality::Stale) => write!(f, "{}={v} (stale)", self.sensor_id),
            (_, Quality::Failed(reason)) => write!(f, "{}: {reason}", self.sensor_id),
            (None, _) => write!(f, "{}: no value", self.sensor_id),
        }
    }
}
