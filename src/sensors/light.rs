//! BH1750 ambient light sensor (I²C).
//!
//! One-time high-resolution mode: power on, trigger, wait for the
//! conversion (≤ 180 ms), read two big-endian bytes.  The device powers
//! down by itself after a one-time measurement.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::app::ports::SensorDevice;
use crate::error::SensorFault;
use crate::measurement::{Quantity, Value};

const CMD_POWER_ON: u8 = 0x01;
const CMD_ONE_TIME_H_RES: u8 = 0x20;
const CONVERSION_MS: u32 = 180;
/// Counts per lux at the default measurement time.
const COUNTS_PER_LUX: f32 = 1.2;

pub struct Bh1750<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Bh1750<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    pub fn read_lux(&mut self) -> Result<f32, SensorFault> {
        self.i2c
            .write(self.address, &[CMD_POWER_ON])
            .map_err(|_| SensorFault::Bus)?;
        self.i2c
            .write(self.address, &[CMD_ONE_TIME_H_RES])
            .map_err(|_| SensorFault::Bus)?;
        self.delay.delay_ms(CONVERSION_MS);

        let mut buf = [0u8; 2];
        self.i2c
            .read(self.address, &mut buf)
            .map_err(|_| SensorFault::Bus)?;
        Ok(f32::from(u16::from_be_bytes(buf)) / COUNTS_PER_LUX)
    }
}

impl<I, D> SensorDevice for Bh1750<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn quantity(&self) -> Quantity {
        Quantity::Illuminance
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        self.read_lux().map(Value::Illuminance)
    }
}
