//! Sensor subsystem: drivers, the generic [`Channel`] wrapper, and the
//! builder that turns the configured [`SensorSpec`]s into channels.
//!
//! ```text
//!   SensorSpec ──build_channels──▶ Channel<driver> ──▶ Box<dyn SensorChannel>
//!                     │
//!                     └── BusProvider (I²C handles, edge counters)
//! ```
//!
//! Drivers only know their vendor protocol ([`SensorDevice`]).  The channel
//! adds what every sensor needs: the timestamp, the timeout verdict and the
//! plausibility check.
//!
//! Only sensors configured as `simulated` produce synthetic data.  A hardware
//! sensor whose bus cannot be opened gets a channel that fails every read
//! with `Disconnected`, so the policy never acts on it.

pub mod atmosphere;
pub mod light;
pub mod linux;
pub mod simulated;
pub mod soil_moisture;
pub mod soil_temperature;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedded_hal::i2c::I2c;
use log::{debug, error, info};

use crate::adapters::time::StdDelay;
use crate::app::ports::{SensorChannel, SensorDevice, SharedClock};
use crate::config::{BusDescriptor, SensorSpec, SystemConfig};
use crate::error::SensorFault;
use crate::measurement::{Measurement, Quantity, SensorId, Value};

pub use linux::LinuxBuses;

use atmosphere::{Bme280, Bme280Channel, SharedBme280};
use light::Bh1750;
use simulated::SimulatedSource;
use soil_moisture::{EdgeCounter, GiesOMat};
use soil_temperature::Ds18b20;

// ───────────────────────────────────────────────────────────────
// Channel
// ───────────────────────────────────────────────────────────────

/// A configured sensor: driver plus id, timeout and clock.
pub struct Channel<D> {
    id: SensorId,
    device: D,
    read_timeout: Duration,
    clock: SharedClock,
}

impl<D: SensorDevice> Channel<D> {
    pub fn new(id: SensorId, device: D, read_timeout_ms: u32, clock: SharedClock) -> Self {
        Self {
            id,
            device,
            read_timeout: Duration::from_millis(u64::from(read_timeout_ms)),
            clock,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: SensorDevice> SensorChannel for Channel<D> {
    fn id(&self) -> &SensorId {
        &self.id
    }

    fn quantity(&self) -> Quantity {
        self.device.quantity()
    }

    fn read(&mut self) -> Measurement {
        let started = Instant::now();
        let sampled = self.device.sample();
        let overran = started.elapsed() > self.read_timeout;
        let now = self.clock.now_ms();

        let checked = if overran {
            Err(SensorFault::Timeout)
        } else {
            sampled.and_then(|v| check_value(self.device.quantity(), v))
        };
        match checked {
            Ok(value) => Measurement::ok(self.id.clone(), value, now),
            Err(fault) => {
                debug!("Sensor '{}': read failed: {fault}", self.id);
                Measurement::failed(self.id.clone(), fault, now)
            }
        }
    }
}

/// Reject values of the wrong quantity, non-finite values, and values
/// outside the physically plausible range.
pub fn check_value(expected: Quantity, value: Value) -> Result<Value, SensorFault> {
    if value.quantity() != expected || !value.raw().is_finite() {
        return Err(SensorFault::Malformed);
    }
    let (lo, hi) = expected.plausible_range();
    if !(lo..=hi).contains(&value.raw()) {
        return Err(SensorFault::OutOfRange);
    }
    Ok(value)
}

// ───────────────────────────────────────────────────────────────
// Bus provider seam
// ───────────────────────────────────────────────────────────────

/// Source of platform bus handles.  Returning `None` means the bus could not
/// be opened; the builder then wires a channel that reports
/// `Failed(Disconnected)` on every read.
pub trait BusProvider {
    type I2c: I2c + Send + 'static;

    /// A handle on I²C bus `bus` (e.g. `/dev/i2c-1`).
    fn i2c(&mut self, bus: u8) -> Option<Self::I2c>;

    /// A rising-edge counter on line `gpio` of GPIO chip `chip`, ignoring
    /// edges closer than `min_edge_gap_us` to the previous one.
    fn edge_counter(
        &mut self,
        chip: u8,
        gpio: u8,
        min_edge_gap_us: u32,
    ) -> Option<Box<dyn EdgeCounter>>;
}

/// Stand-in device for a sensor whose bus is missing.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable {
    quantity: Quantity,
}

impl SensorDevice for Unavailable {
    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        Err(SensorFault::Disconnected)
    }
}

// ───────────────────────────────────────────────────────────────
// Builder
// ───────────────────────────────────────────────────────────────

/// Build one channel per configured sensor, in configuration order.
///
/// `pump_level` couples `irrigated` moisture simulations to the simulated
/// relay.
pub fn build_channels<P: BusProvider>(
    config: &SystemConfig,
    buses: &mut P,
    clock: &SharedClock,
    pump_level: &Arc<AtomicBool>,
) -> Vec<Box<dyn SensorChannel>> {
    let mut chips: HashMap<(u8, u8), SharedBme280<P::I2c, StdDelay>> = HashMap::new();
    let mut channels: Vec<Box<dyn SensorChannel>> = Vec::with_capacity(config.sensors.len());

    for spec in &config.sensors {
        let id = spec.id.clone();
        let timeout = spec.read_timeout_ms;
        let channel: Box<dyn SensorChannel> = match &spec.bus {
            BusDescriptor::GiesOMat {
                gpio,
                chip,
                min_edge_gap_us,
                sample_window_ms,
                calibration,
            } => match buses.edge_counter(*chip, *gpio, *min_edge_gap_us) {
                Some(counter) => {
                    let probe = GiesOMat::new(counter, StdDelay, *sample_window_ms, *calibration);
                    Box::new(Channel::new(id, probe, timeout, clock.clone()))
                }
                None => unavailable(spec, "edge counter", clock),
            },
            BusDescriptor::Ds18b20 { device, root } => {
                let probe = match device {
                    Some(device) => Ds18b20::new(root, device),
                    None => Ds18b20::first_found(root),
                };
                Box::new(Channel::new(id, probe, timeout, clock.clone()))
            }
            BusDescriptor::Bh1750 { i2c_bus, address } => match buses.i2c(*i2c_bus) {
                Some(i2c) => {
                    let sensor = Bh1750::new(i2c, StdDelay, *address);
                    Box::new(Channel::new(id, sensor, timeout, clock.clone()))
                }
                None => unavailable(spec, "I2C bus", clock),
            },
            BusDescriptor::Bme280 {
                i2c_bus,
                address,
                quantity,
            } => {
                let key = (*i2c_bus, *address);
                let chip = chips.get(&key).cloned().or_else(|| {
                    let i2c = buses.i2c(*i2c_bus)?;
                    let chip = Arc::new(Mutex::new(Bme280::new(i2c, StdDelay, *address)));
                    chips.insert(key, chip.clone());
                    Some(chip)
                });
                match chip {
                    Some(chip) => Box::new(Channel::new(
                        id,
                        Bme280Channel::new(chip, *quantity),
                        timeout,
                        clock.clone(),
                    )),
                    None => unavailable(spec, "I2C bus", clock),
                }
            }
            BusDescriptor::Simulated {
                quantity,
                base,
                amplitude,
                period_secs,
                irrigated,
                fail_every,
            } => {
                let mut source =
                    SimulatedSource::new(*quantity, *base, *amplitude, *period_secs, clock.clone())
                        .failing_every(*fail_every);
                if *irrigated {
                    source = source.irrigated_by(pump_level.clone());
                }
                Box::new(Channel::new(id, source, timeout, clock.clone()))
            }
        };
        info!(
            "Sensor '{}': {:?} every {} ms",
            spec.id,
            channel.quantity(),
            spec.poll_interval_ms
        );
        channels.push(channel);
    }
    channels
}

/// Channel for a sensor whose bus could not be opened.
fn unavailable(spec: &SensorSpec, missing: &str, clock: &SharedClock) -> Box<dyn SensorChannel> {
    error!(
        "Sensor '{}': no {missing}, every read will fail as disconnected",
        spec.id
    );
    Box::new(Channel::new(
        spec.id.clone(),
        Unavailable {
            quantity: spec.quantity(),
        },
        spec.read_timeout_ms,
        clock.clone(),
    ))
}
