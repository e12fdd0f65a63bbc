//! Output pins for the pump relay.
//!
//! - [`SysfsPin`] drives a line through the Linux `/sys/class/gpio`
//!   interface (export, direction, value).
//! - [`SimPin`] keeps the level in memory; the handle from
//!   [`SimPin::level`] lets the simulated soil model see the pump.
//!
//! Both implement `embedded_hal::digital::StatefulOutputPin`, so the relay
//! driver can read back what it wrote.

use core::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin, StatefulOutputPin};
use log::debug;

/// How long to wait for udev to set up a freshly exported line.
const EXPORT_RETRIES: u32 = 20;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct GpioError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for GpioError {}

impl digital::Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

// ───────────────────────────────────────────────────────────────
// Sysfs pin
// ───────────────────────────────────────────────────────────────

pub struct SysfsPin {
    value: PathBuf,
}

impl SysfsPin {
    /// Export `gpio` under `root` (normally `/sys/class/gpio`) if needed and
    /// configure it as an output.
    pub fn open(root: impl AsRef<Path>, gpio: u32) -> Result<Self, GpioError> {
        let root = root.as_ref();
        let line = root.join(format!("gpio{gpio}"));
        if !line.exists() {
            write_file(&root.join("export"), &gpio.to_string())?;
            debug!("GPIO {gpio}: exported");
        }

        // The direction file appears (and becomes writable) asynchronously
        // after export.
        let direction = line.join("direction");
        let mut attempt = 0;
        loop {
            match write_file(&direction, "out") {
                Ok(()) => break,
                Err(e) if attempt + 1 >= EXPORT_RETRIES => return Err(e),
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(EXPORT_RETRY_DELAY);
                }
            }
        }

        Ok(Self {
            value: line.join("value"),
        })
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), GpioError> {
    std::fs::write(path, contents).map_err(|source| GpioError {
        path: path.to_path_buf(),
        source,
    })
}

impl ErrorType for SysfsPin {
    type Error = GpioError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        write_file(&self.value, "0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        write_file(&self.value, "1")
    }
}

impl StatefulOutputPin for SysfsPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        let text = std::fs::read_to_string(&self.value).map_err(|source| GpioError {
            path: self.value.clone(),
            source,
        })?;
        Ok(text.trim() == "1")
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        self.is_set_high().map(|high| !high)
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated pin
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SimPin {
    level: Arc<AtomicBool>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pin whose level is shared with `level`.
    pub fn with_level(level: Arc<AtomicBool>) -> Self {
        Self { level }
    }

    /// Shared handle on the output level (`true` = high).
    pub fn level(&self) -> Arc<AtomicBool> {
        self.level.clone()
    }
}

impl ErrorType for SimPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.store(false, Ordering::Release);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.store(true, Ordering::Release);
        Ok(())
    }
}

impl StatefulOutputPin for SimPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level.load(Ordering::Acquire))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level.load(Ordering::Acquire))
    }
}
