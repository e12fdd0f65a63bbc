//! Irrigation pump relay driver.
//!
//! Binary on/off through one relay output.  After driving the pin the
//! driver polls the pin state every millisecond until it reports the
//! commanded level or the confirmation window closes.
//!
//! ## Safety contract
//!
//! This driver is a dumb actuator: the runaway cutoff and dwell rules live
//! in the control policy.  It only guarantees that `Ok` means the output
//! really reports the commanded level.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::StatefulOutputPin;
use log::debug;

use crate::app::ports::{ActuatorDriver, Confirmed};
use crate::control::state::Switch;
use crate::error::ActuatorError;

pub struct PumpRelay<P, D> {
    pin: P,
    delay: D,
    /// Relay boards that energise on a low input.
    active_low: bool,
    confirm_timeout_ms: u32,
}

impl<P: StatefulOutputPin, D: DelayNs> PumpRelay<P, D> {
    pub fn new(pin: P, delay: D, active_low: bool, confirm_timeout_ms: u32) -> Self {
        Self {
            pin,
            delay,
            active_low,
            confirm_timeout_ms,
        }
    }

    /// Pin level that corresponds to `target`.
    fn level_for(&self, target: Switch) -> bool {
        target.is_on() != self.active_low
    }
}

impl<P: StatefulOutputPin, D: DelayNs> ActuatorDriver for PumpRelay<P, D> {
    fn apply(&mut self, target: Switch) -> Result<Confirmed, ActuatorError> {
        let high = self.level_for(target);
        let written = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        written.map_err(|_| ActuatorError::GpioWriteFailed)?;

        for waited in 0..=self.confirm_timeout_ms {
            let is_high = self
                .pin
                .is_set_high()
                .map_err(|_| ActuatorError::GpioReadFailed)?;
            if is_high == high {
                debug!("Pump relay: {target} confirmed after {waited} ms");
                return Ok(Confirmed(target));
            }
            self.delay.delay_ms(1);
        }
        Err(ActuatorError::ConfirmTimeout)
    }
}
