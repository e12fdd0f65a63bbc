//! Synthetic sensor sources for host runs.
//!
//! Two flavours:
//! - a sinusoid around a base value (light, air readings, soil temperature);
//! - a soil model whose moisture falls while the pump is off and rises
//!   while it runs, coupled to the simulated relay through a shared level.
//!
//! Both can be told to fail every n-th read to exercise the degraded paths.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::app::ports::{SensorDevice, SharedClock};
use crate::error::SensorFault;
use crate::measurement::{Quantity, Timestamp, Value};

/// Moisture loss while the pump is off (percent per second).
const DRY_RATE_PCT_PER_S: f32 = 0.05;
/// Moisture gain while the pump runs (percent per second).
const WET_RATE_PCT_PER_S: f32 = 0.5;

pub struct SimulatedSource {
    quantity: Quantity,
    base: f32,
    amplitude: f32,
    period_ms: u64,
    fail_every: u32,
    reads: u32,
    clock: SharedClock,
    soil: Option<SoilModel>,
}

impl SimulatedSource {
    pub fn new(
        quantity: Quantity,
        base: f32,
        amplitude: f32,
        period_secs: u32,
        clock: SharedClock,
    ) -> Self {
        Self {
            quantity,
            base,
            amplitude,
            period_ms: u64::from(period_secs) * 1000,
            fail_every: 0,
            reads: 0,
            clock,
            soil: None,
        }
    }

    /// Fail every `n`-th read with a bus fault (0 disables).
    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail_every = n;
        self
    }

    /// Replace the sinusoid with a soil model driven by `pump`.
    pub fn irrigated_by(mut self, pump: Arc<AtomicBool>) -> Self {
        self.soil = Some(SoilModel {
            level: self.base,
            pump,
            last_ms: None,
        });
        self
    }

    fn wave(&self, now: Timestamp) -> f32 {
        if self.period_ms == 0 || self.amplitude == 0.0 {
            return self.base;
        }
        let phase = (now % self.period_ms) as f32 / self.period_ms as f32;
        self.base + self.amplitude * (TAU * phase).sin()
    }
}

impl SensorDevice for SimulatedSource {
    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        self.reads = self.reads.wrapping_add(1);
        if self.fail_every > 0 && self.reads % self.fail_every == 0 {
            return Err(SensorFault::Bus);
        }
        let now = self.clock.now_ms();
        let raw = match &mut self.soil {
            Some(soil) => soil.advance(now),
            None => self.wave(now),
        };
        Ok(Value::of(self.quantity, raw))
    }
}

/// Bucket model of one irrigated bed.
struct SoilModel {
    level: f32,
    pump: Arc<AtomicBool>,
    last_ms: Option<Timestamp>,
}

impl SoilModel {
    fn advance(&mut self, now: Timestamp) -> f32 {
        if let Some(last) = self.last_ms {
            let dt = now.saturating_sub(last) as f32 / 1000.0;
            let rate = if self.pump.load(Ordering::Acquire) {
                WET_RATE_PCT_PER_S
            } else {
                -DRY_RATE_PCT_PER_S
            };
            self.level = (self.level + rate * dt).clamp(0.0, 100.0);
        }
        self.last_ms = Some(now);
        self.level
    }
}
