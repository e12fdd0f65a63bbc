//! Linux bus backends.
//!
//! - I²C: `/dev/i2c-<bus>` through `linux_embedded_hal::I2cdev`.
//! - Edge counting: rising-edge events from `/dev/gpiochip<chip>` via the
//!   GPIO character device.  A counter thread per line drains the kernel
//!   event queue into an atomic tally, so a read never waits on the line.
//!
//! A bus that cannot be opened is logged and reported as absent.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use gpio_cdev::{Chip, EventRequestFlags, LineEventHandle, LineRequestFlags};
use linux_embedded_hal::I2cdev;
use log::{error, info, warn};

use crate::error::SensorFault;

use super::BusProvider;
use super::soil_moisture::{EdgeCounter, EdgeFilter};

const CONSUMER: &str = "greenhouse";

// ───────────────────────────────────────────────────────────────
// Provider
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LinuxBuses {
    dev_root: PathBuf,
}

impl LinuxBuses {
    pub fn new() -> Self {
        Self::with_dev_root("/dev")
    }

    /// Look for device nodes under `dev_root` instead of `/dev`.
    pub fn with_dev_root(dev_root: impl AsRef<Path>) -> Self {
        Self {
            dev_root: dev_root.as_ref().to_path_buf(),
        }
    }
}

impl Default for LinuxBuses {
    fn default() -> Self {
        Self::new()
    }
}

impl BusProvider for LinuxBuses {
    type I2c = I2cdev;

    fn i2c(&mut self, bus: u8) -> Option<I2cdev> {
        let path = self.dev_root.join(format!("i2c-{bus}"));
        match I2cdev::new(&path) {
            Ok(dev) => {
                info!("I2C: opened {}", path.display());
                Some(dev)
            }
            Err(e) => {
                error!("I2C: cannot open {}: {e}", path.display());
                None
            }
        }
    }

    fn edge_counter(
        &mut self,
        chip: u8,
        gpio: u8,
        min_edge_gap_us: u32,
    ) -> Option<Box<dyn EdgeCounter>> {
        let path = self.dev_root.join(format!("gpiochip{chip}"));
        match CdevEdgeCounter::open(&path, u32::from(gpio), min_edge_gap_us) {
            Ok(counter) => {
                info!("GPIO: counting rising edges on {} line {gpio}", path.display());
                Some(Box::new(counter))
            }
            Err(e) => {
                error!("GPIO: cannot watch {} line {gpio}: {e}", path.display());
                None
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Edge counter
// ───────────────────────────────────────────────────────────────

pub struct CdevEdgeCounter {
    edges: Arc<AtomicU32>,
    failed: Arc<AtomicBool>,
}

impl CdevEdgeCounter {
    /// Request rising-edge events on `line` and start the counter thread.
    pub fn open(chip: &Path, line: u32, min_edge_gap_us: u32) -> io::Result<Self> {
        let mut chip = Chip::new(chip).map_err(|e| io::Error::other(e.to_string()))?;
        let events = chip
            .get_line(line)
            .and_then(|l| {
                l.events(
                    LineRequestFlags::INPUT,
                    EventRequestFlags::RISING_EDGE,
                    CONSUMER,
                )
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let edges = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let (tally, dead) = (edges.clone(), failed.clone());
        let filter = EdgeFilter::new(min_edge_gap_us);
        std::thread::Builder::new()
            .name(format!("edges-{line}"))
            .spawn(move || count_edges(events, line, filter, &tally, &dead))?;

        Ok(Self { edges, failed })
    }
}

fn count_edges(
    events: LineEventHandle,
    line: u32,
    mut filter: EdgeFilter,
    edges: &AtomicU32,
    failed: &AtomicBool,
) {
    for event in events {
        match event {
            Ok(event) => {
                if filter.accept(event.timestamp()) {
                    edges.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!("GPIO line {line}: edge events stopped: {e}");
                break;
            }
        }
    }
    failed.store(true, Ordering::Release);
}

impl EdgeCounter for CdevEdgeCounter {
    fn reset(&mut self) -> Result<(), SensorFault> {
        if self.failed.load(Ordering::Acquire) {
            return Err(SensorFault::Bus);
        }
        self.edges.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn tally(&mut self) -> Result<u32, SensorFault> {
        if self.failed.load(Ordering::Acquire) {
            return Err(SensorFault::Bus);
        }
        Ok(self.edges.load(Ordering::Relaxed))
    }
}
