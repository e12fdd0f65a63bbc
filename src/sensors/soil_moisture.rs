//! Gies-O-Mat capacitive soil moisture probe.
//!
//! The probe outputs a square wave whose frequency drops as the soil gets
//! wetter.  A read resets an edge counter on the probe's GPIO, waits one
//! sample window and converts the tally to a frequency, then to moisture
//! percent through a two-point dry/wet calibration.

use embedded_hal::delay::DelayNs;

use crate::app::ports::SensorDevice;
use crate::config::MoistureCalibration;
use crate::error::SensorFault;
use crate::measurement::{Quantity, Value};

/// Rising-edge tally on one input line.
pub trait EdgeCounter: Send {
    /// Zero the tally.
    fn reset(&mut self) -> Result<(), SensorFault>;

    /// Edges seen since the last reset.
    fn tally(&mut self) -> Result<u32, SensorFault>;
}

impl<T: EdgeCounter + ?Sized> EdgeCounter for Box<T> {
    fn reset(&mut self) -> Result<(), SensorFault> {
        (**self).reset()
    }

    fn tally(&mut self) -> Result<u32, SensorFault> {
        (**self).tally()
    }
}

/// Drops edges that follow the last accepted one by less than a minimum
/// gap.  Timestamps are in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct EdgeFilter {
    min_gap_ns: u64,
    last: Option<u64>,
}

impl EdgeFilter {
    pub fn new(min_gap_us: u32) -> Self {
        Self {
            min_gap_ns: u64::from(min_gap_us) * 1_000,
            last: None,
        }
    }

    pub fn accept(&mut self, timestamp_ns: u64) -> bool {
        let keep = self
            .last
            .is_none_or(|prev| timestamp_ns.saturating_sub(prev) >= self.min_gap_ns);
        if keep {
            self.last = Some(timestamp_ns);
        }
        keep
    }
}

pub struct GiesOMat<C, D> {
    counter: C,
    delay: D,
    sample_window_ms: u32,
    calibration: MoistureCalibration,
}

impl<C: EdgeCounter, D: DelayNs + Send> GiesOMat<C, D> {
    pub fn new(counter: C, delay: D, sample_window_ms: u32, calibration: MoistureCalibration) -> Self {
        Self {
            counter,
            delay,
            sample_window_ms,
            calibration,
        }
    }

    /// Probe output frequency over one sample window.
    pub fn frequency_hz(&mut self) -> Result<f32, SensorFault> {
        self.counter.reset()?;
        self.delay.delay_ms(self.sample_window_ms);
        let pulses = self.counter.tally()?;
        if pulses == 0 {
            return Err(SensorFault::NoSignal);
        }
        Ok(pulses as f32 * 1000.0 / self.sample_window_ms as f32)
    }
}

impl<C: EdgeCounter, D: DelayNs + Send> SensorDevice for GiesOMat<C, D> {
    fn quantity(&self) -> Quantity {
        Quantity::Moisture
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        let hz = self.frequency_hz()?;
        Ok(Value::Moisture(self.calibration.moisture_percent(hz)))
    }
}
