//! Actuator drivers: the pump relay and the output pins it can drive.

pub mod gpio;
pub mod pump;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use log::{error, info, warn};

use crate::adapters::time::StdDelay;
use crate::app::ports::ActuatorDriver;
use crate::config::{ActuatorOutput, ActuatorSpec};
use crate::control::state::Switch;
use crate::error::Error;

use gpio::{SimPin, SysfsPin};
use pump::PumpRelay;

/// Build the pump driver described by `spec` and drive it off.
///
/// The simulated relay shares `pump_level` with the simulated soil model.
pub fn build_actuator(
    spec: &ActuatorSpec,
    pump_level: &Arc<AtomicBool>,
) -> Result<Box<dyn ActuatorDriver>, Error> {
    let mut driver: Box<dyn ActuatorDriver> = match &spec.output {
        ActuatorOutput::SysfsGpio {
            gpio,
            active_low,
            root,
        } => {
            let pin = SysfsPin::open(root, *gpio).map_err(|e| {
                error!("Pump '{}': {e}", spec.id);
                Error::Init("cannot open pump relay GPIO")
            })?;
            info!("Pump '{}': sysfs GPIO {gpio} (active_low={active_low})", spec.id);
            Box::new(PumpRelay::new(pin, StdDelay, *active_low, spec.confirm_timeout_ms))
        }
        ActuatorOutput::Simulated => {
            info!("Pump '{}': simulated relay", spec.id);
            Box::new(PumpRelay::new(
                SimPin::with_level(pump_level.clone()),
                StdDelay,
                false,
                spec.confirm_timeout_ms,
            ))
        }
    };

    if let Err(e) = driver.apply(Switch::Off) {
        warn!("Pump '{}': initial OFF not confirmed: {e}", spec.id);
    }
    Ok(driver)
}
