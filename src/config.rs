//! System configuration.
//!
//! Everything the controller needs at startup: the sensor list with per-sensor
//! cadence and backoff, the irrigation thresholds, and the pump descriptor.
//! Loaded once from a JSON file (or [`SystemConfig::default`], a fully
//! simulated greenhouse) and never mutated afterwards.
//!
//! Validation happens here, before anything is spawned: an invalid threshold
//! pair must stop the process, not surface halfway through a watering cycle.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::measurement::{ActuatorId, DeviceId, Quantity, SensorId};

/// Maximum number of sensor channels (size of the scheduler arena).
pub const MAX_SENSORS: usize = 16;

/// A reading older than this many poll intervals is marked stale.
pub const STALE_AFTER_INTERVALS: u64 = 3;

// ───────────────────────────────────────────────────────────────
// Top level
// ───────────────────────────────────────────────────────────────

/// Core system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Control loop tick (milliseconds).
    #[serde(default = "default_loop_interval_ms")]
    pub control_loop_interval_ms: u32,
    /// How long shutdown waits for in-flight sensor reads (milliseconds).
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u32,
    pub sensors: Vec<SensorSpec>,
    pub thresholds: PolicyThresholds,
    pub actuator: ActuatorSpec,
    /// Append-only JSON-lines telemetry file.  `None` disables the stream.
    #[serde(default)]
    pub telemetry_path: Option<String>,
}

fn default_loop_interval_ms() -> u32 {
    1000
}

fn default_shutdown_grace_ms() -> u32 {
    5000
}

// ───────────────────────────────────────────────────────────────
// Sensors
// ───────────────────────────────────────────────────────────────

/// Static description of one sensor channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSpec {
    pub id: SensorId,
    pub bus: BusDescriptor,
    /// Nominal polling interval (milliseconds).
    pub poll_interval_ms: u32,
    /// Upper bound on a single read (milliseconds).
    pub read_timeout_ms: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl SensorSpec {
    pub fn quantity(&self) -> Quantity {
        self.bus.quantity()
    }

    /// Age beyond which the last good reading is considered stale.
    pub fn stale_after_ms(&self) -> u64 {
        u64::from(self.poll_interval_ms) * STALE_AFTER_INTERVALS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg| Err(ConfigError::SensorInvalid(self.id.clone(), msg));
        if self.id.is_empty() {
            return Err(ConfigError::InvalidId(String::new()));
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be > 0");
        }
        if self.read_timeout_ms == 0 {
            return fail("read_timeout_ms must be > 0");
        }
        if self.backoff.failure_threshold == 0 {
            return fail("backoff.failure_threshold must be >= 1");
        }
        if self.backoff.multiplier == 0 {
            return fail("backoff.multiplier must be >= 1");
        }
        if self.backoff.max_interval_ms < self.poll_interval_ms {
            return fail("backoff.max_interval_ms must be >= poll_interval_ms");
        }
        match &self.bus {
            BusDescriptor::GiesOMat {
                sample_window_ms,
                calibration,
                ..
            } => {
                if *sample_window_ms == 0 {
                    return fail("sample_window_ms must be > 0");
                }
                if *sample_window_ms >= self.read_timeout_ms {
                    return fail("sample_window_ms must fit inside read_timeout_ms");
                }
                if !calibration.is_valid() {
                    return fail("calibration needs finite, distinct dry_hz and wet_hz");
                }
            }
            BusDescriptor::Ds18b20 {
                device: Some(device),
                ..
            } if device.is_empty() => {
                return fail("1-wire device name is empty");
            }
            BusDescriptor::Bme280 { quantity, .. }
                if !matches!(
                    quantity,
                    Quantity::Pressure | Quantity::Humidity | Quantity::Temperature
                ) =>
            {
                return fail("BME280 measures pressure, humidity or temperature only");
            }
            BusDescriptor::Simulated {
                base, amplitude, ..
            } if !base.is_finite() || !amplitude.is_finite() => {
                return fail("simulated base/amplitude must be finite");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Where a sensor lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusDescriptor {
    /// Gies-O-Mat capacitive soil moisture probe: square-wave output whose
    /// frequency falls as the soil gets wetter.
    GiesOMat {
        gpio: u8,
        /// GPIO character device index (`/dev/gpiochip<chip>`).
        #[serde(default)]
        chip: u8,
        /// Edges closer together than this are line noise, not probe output.
        #[serde(default = "default_min_edge_gap_us")]
        min_edge_gap_us: u32,
        #[serde(default = "default_sample_window_ms")]
        sample_window_ms: u32,
        #[serde(default)]
        calibration: MoistureCalibration,
    },
    /// DS18B20 soil temperature probe on the Linux 1-wire sysfs bus.
    Ds18b20 {
        /// 1-wire device name (`28-…`).  Omitted: the first probe found
        /// under `root`.
        #[serde(default)]
        device: Option<String>,
        #[serde(default = "default_w1_root")]
        root: String,
    },
    /// BH1750 ambient light sensor on I2C.
    Bh1750 {
        i2c_bus: u8,
        #[serde(default = "default_bh1750_address")]
        address: u8,
    },
    /// BME280 pressure/humidity/temperature sensor on I2C, one channel per
    /// quantity.
    Bme280 {
        i2c_bus: u8,
        #[serde(default = "default_bme280_address")]
        address: u8,
        quantity: Quantity,
    },
    /// Synthetic source for host runs.
    Simulated {
        quantity: Quantity,
        base: f32,
        #[serde(default)]
        amplitude: f32,
        /// Period of the sinusoidal variation (seconds).  0 = constant.
        #[serde(default)]
        period_secs: u32,
        /// Couple a moisture source to the simulated pump.
        #[serde(default)]
        irrigated: bool,
        /// Fail every n-th read (0 = never).
        #[serde(default)]
        fail_every: u32,
    },
}

impl BusDescriptor {
    pub fn quantity(&self) -> Quantity {
        match self {
            Self::GiesOMat { .. } => Quantity::Moisture,
            Self::Ds18b20 { .. } => Quantity::Temperature,
            Self::Bh1750 { .. } => Quantity::Illuminance,
            Self::Bme280 { quantity, .. } | Self::Simulated { quantity, .. } => *quantity,
        }
    }
}

fn default_sample_window_ms() -> u32 {
    500
}

fn default_min_edge_gap_us() -> u32 {
    20
}

fn default_w1_root() -> String {
    "/sys/bus/w1/devices".into()
}

fn default_bh1750_address() -> u8 {
    0x23
}

fn default_bme280_address() -> u8 {
    0x76
}

/// Two-point frequency calibration for the Gies-O-Mat probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MoistureCalibration {
    /// Output frequency in dry air (0 % moisture).
    pub dry_hz: f32,
    /// Output frequency in water-saturated soil (100 % moisture).
    pub wet_hz: f32,
}

impl Default for MoistureCalibration {
    fn default() -> Self {
        Self {
            dry_hz: 12_000.0,
            wet_hz: 2_000.0,
        }
    }
}

impl MoistureCalibration {
    pub fn is_valid(&self) -> bool {
        self.dry_hz.is_finite()
            && self.wet_hz.is_finite()
            && (self.dry_hz - self.wet_hz).abs() > f32::EPSILON
    }

    /// Map a probe frequency onto 0–100 % moisture.
    pub fn moisture_percent(&self, hz: f32) -> f32 {
        ((self.dry_hz - hz) / (self.dry_hz - self.wet_hz) * 100.0).clamp(0.0, 100.0)
    }
}

/// Exponential backoff for a sensor that keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Consecutive failures before the interval starts growing.
    pub failure_threshold: u32,
    /// Growth factor per further failure.
    pub multiplier: u32,
    /// Upper bound on the effective interval (milliseconds).
    pub max_interval_ms: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            multiplier: 2,
            max_interval_ms: 300_000,
        }
    }
}

impl BackoffPolicy {
    /// Effective polling interval after `consecutive_failures` failed reads.
    ///
    /// Below the threshold this is the nominal interval; from the threshold on
    /// it grows by `multiplier` per failure, capped at `max_interval_ms`.
    pub fn interval_for(&self, poll_interval_ms: u32, consecutive_failures: u32) -> u64 {
        let base = u64::from(poll_interval_ms);
        if consecutive_failures < self.failure_threshold {
            return base;
        }
        let exponent = consecutive_failures - self.failure_threshold + 1;
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        base.saturating_mul(factor)
            .min(u64::from(self.max_interval_ms))
            .max(base)
    }
}

// ───────────────────────────────────────────────────────────────
// Policy thresholds
// ───────────────────────────────────────────────────────────────

/// Irrigation thresholds (read-only input to the control policy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    /// Switch the pump on below this moisture (%).
    pub moisture_low: f32,
    /// Switch the pump off above this moisture (%).
    pub moisture_high: f32,
    /// Minimum time the pump stays on once started (seconds).
    pub min_on_duration_secs: u32,
    /// Minimum time the pump stays off once stopped (seconds).
    pub min_off_duration_secs: u32,
    /// Runaway protection: the pump is forced off after this long (seconds).
    pub max_on_duration_secs: u32,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            moisture_low: 30.0,
            moisture_high: 60.0,
            min_on_duration_secs: 30,
            min_off_duration_secs: 60,
            max_on_duration_secs: 600,
        }
    }
}

impl PolicyThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.moisture_low.is_finite() || !self.moisture_high.is_finite() {
            return Err(ConfigError::ValidationFailed(
                "moisture thresholds must be finite",
            ));
        }
        if self.moisture_low >= self.moisture_high {
            return Err(ConfigError::ThresholdOrder {
                low: self.moisture_low,
                high: self.moisture_high,
            });
        }
        if self.moisture_low < 0.0 || self.moisture_high > 100.0 {
            return Err(ConfigError::ValidationFailed(
                "moisture thresholds must lie within 0-100 %",
            ));
        }
        if self.max_on_duration_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_on_duration_secs must be > 0",
            ));
        }
        Ok(())
    }

    pub fn min_on_ms(&self) -> u64 {
        u64::from(self.min_on_duration_secs) * 1000
    }

    pub fn min_off_ms(&self) -> u64 {
        u64::from(self.min_off_duration_secs) * 1000
    }

    pub fn max_on_ms(&self) -> u64 {
        u64::from(self.max_on_duration_secs) * 1000
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator
// ───────────────────────────────────────────────────────────────

/// The irrigation pump and the sensor it is controlled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorSpec {
    pub id: ActuatorId,
    /// Moisture sensor the policy reads.
    pub moisture_sensor: SensorId,
    pub output: ActuatorOutput,
    /// How long the driver waits for the output to report the new level.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u32,
    /// Consecutive failed commands tolerated before actuation halts.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_confirm_timeout_ms() -> u32 {
    200
}

fn default_max_consecutive_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorOutput {
    /// Relay on a Linux sysfs GPIO line.
    SysfsGpio {
        gpio: u32,
        #[serde(default)]
        active_low: bool,
        #[serde(default = "default_gpio_root")]
        root: String,
    },
    /// In-memory relay for host runs.
    Simulated,
}

fn default_gpio_root() -> String {
    "/sys/class/gpio".into()
}

// ───────────────────────────────────────────────────────────────
// Loading and validation
// ───────────────────────────────────────────────────────────────

impl SystemConfig {
    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_loop_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "control_loop_interval_ms must be > 0",
            ));
        }
        if self.sensors.is_empty() {
            return Err(ConfigError::ValidationFailed("no sensors configured"));
        }
        if self.sensors.len() > MAX_SENSORS {
            return Err(ConfigError::ValidationFailed(
                "too many sensors for the scheduler arena",
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.sensors {
            spec.validate()?;
            if !seen.insert(&spec.id) {
                return Err(ConfigError::DuplicateSensor(spec.id.clone()));
            }
        }

        self.thresholds.validate()?;

        let actuator = &self.actuator;
        if actuator.id.is_empty() {
            return Err(ConfigError::InvalidId(String::new()));
        }
        if actuator.confirm_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "actuator.confirm_timeout_ms must be > 0",
            ));
        }
        let moisture = self
            .sensor(&actuator.moisture_sensor)
            .ok_or_else(|| ConfigError::UnknownSensor(actuator.moisture_sensor.clone()))?;
        if moisture.quantity() != Quantity::Moisture {
            return Err(ConfigError::NotAMoistureSensor(moisture.id.clone()));
        }
        if matches!(actuator.output, ActuatorOutput::SysfsGpio { .. })
            && matches!(moisture.bus, BusDescriptor::Simulated { .. })
        {
            return Err(ConfigError::SimulatedMoistureOnRelay(moisture.id.clone()));
        }
        Ok(())
    }

    pub fn sensor(&self, id: &SensorId) -> Option<&SensorSpec> {
        self.sensors.iter().find(|s| &s.id == id)
    }
}

impl Default for SystemConfig {
    /// A simulated greenhouse: one irrigated bed, light, BME280-style air
    /// readings and a soil thermometer, all synthetic.
    fn default() -> Self {
        let sim = |id: &str, quantity, base, amplitude, period_secs, poll_interval_ms| SensorSpec {
            id: DeviceId::lossy(id),
            bus: BusDescriptor::Simulated {
                quantity,
                base,
                amplitude,
                period_secs,
                irrigated: false,
                fail_every: 0,
            },
            poll_interval_ms,
            read_timeout_ms: 1000,
            backoff: BackoffPolicy::default(),
        };

        let mut moisture = sim("bed-moisture", Quantity::Moisture, 45.0, 0.0, 0, 5_000);
        if let BusDescriptor::Simulated { irrigated, .. } = &mut moisture.bus {
            *irrigated = true;
        }

        Self {
            control_loop_interval_ms: default_loop_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            sensors: vec![
                moisture,
                sim("canopy-light", Quantity::Illuminance, 20_000.0, 15_000.0, 600, 10_000),
                sim("air-pressure", Quantity::Pressure, 1013.0, 3.0, 3600, 30_000),
                sim("air-humidity", Quantity::Humidity, 65.0, 10.0, 1800, 10_000),
                sim("air-temperature", Quantity::Temperature, 22.0, 4.0, 1800, 10_000),
                sim("soil-temperature", Quantity::Temperature, 18.0, 1.0, 3600, 15_000),
            ],
            thresholds: PolicyThresholds::default(),
            actuator: ActuatorSpec {
                id: DeviceId::lossy("pump"),
                moisture_sensor: DeviceId::lossy("bed-moisture"),
                output: ActuatorOutput::Simulated,
                confirm_timeout_ms: default_confirm_timeout_ms(),
                max_consecutive_failures: default_max_consecutive_failures(),
            },
            telemetry_path: None,
        }
    }
}
