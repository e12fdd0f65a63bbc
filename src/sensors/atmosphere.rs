//! BME280 pressure / humidity / temperature sensor (I²C).
//!
//! One physical chip serves up to three channels.  They share the driver
//! through [`SharedBme280`]; each channel triggers its own forced-mode
//! conversion under the lock and keeps the quantity it was configured for.
//!
//! Compensation uses the floating-point formulas from the Bosch datasheet
//! (section 8.1).

use std::sync::{Arc, Mutex, PoisonError};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::app::ports::SensorDevice;
use crate::error::SensorFault;
use crate::measurement::{Quantity, Value};

// ── Registers ─────────────────────────────────────────────────

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_26: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_DATA: u8 = 0xF7;

const CHIP_ID: u8 = 0x60;
/// Humidity oversampling ×1.
const CTRL_HUM_X1: u8 = 0b001;
/// Temperature ×1, pressure ×1, forced mode.
const CTRL_MEAS_FORCED_X1: u8 = (0b001 << 5) | (0b001 << 2) | 0b01;
const STATUS_MEASURING: u8 = 0b1000;
/// Maximum conversion time at ×1 oversampling is 9.3 ms.
const CONVERSION_MS: u32 = 10;
const STATUS_POLLS: u32 = 5;

/// Factory trimming parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p: [i16; 9],
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

impl Calibration {
    /// Decode the two calibration blocks (0x88..=0xA1 and 0xE1..=0xE7).
    pub fn from_registers(block0: &[u8; 26], block1: &[u8; 7]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([block0[i], block0[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([block0[i], block0[i + 1]]);

        let mut p = [0i16; 9];
        // dig_P1 is unsigned; keep the raw bits and widen on use.
        p[0] = u16_at(6) as i16;
        for (n, slot) in p.iter_mut().enumerate().skip(1) {
            *slot = i16_at(6 + 2 * n);
        }

        let e4 = i16::from(block1[3] as i8);
        let e5 = i16::from(block1[4]);
        let e6 = i16::from(block1[5] as i8);

        Self {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p,
            h1: block0[25],
            h2: i16::from_le_bytes([block1[0], block1[1]]),
            h3: block1[2],
            h4: (e4 << 4) | (e5 & 0x0F),
            h5: (e6 << 4) | (e5 >> 4),
            h6: block1[6] as i8,
        }
    }

    fn p1(&self) -> f64 {
        f64::from(self.p[0] as u16)
    }

    fn pn(&self, n: usize) -> f64 {
        f64::from(self.p[n - 1])
    }

    /// Returns (°C, t_fine).
    pub fn temperature(&self, adc_t: i32) -> (f64, f64) {
        let adc = f64::from(adc_t);
        let t1 = f64::from(self.t1);
        let var1 = (adc / 16_384.0 - t1 / 1_024.0) * f64::from(self.t2);
        let d = adc / 131_072.0 - t1 / 8_192.0;
        let var2 = d * d * f64::from(self.t3);
        let t_fine = var1 + var2;
        (t_fine / 5_120.0, t_fine)
    }

    /// Pressure in hPa.
    pub fn pressure(&self, adc_p: i32, t_fine: f64) -> Option<f64> {
        let mut var1 = t_fine / 2.0 - 64_000.0;
        let mut var2 = var1 * var1 * self.pn(6) / 32_768.0;
        var2 += var1 * self.pn(5) * 2.0;
        var2 = var2 / 4.0 + self.pn(4) * 65_536.0;
        var1 = (self.pn(3) * var1 * var1 / 524_288.0 + self.pn(2) * var1) / 524_288.0;
        var1 = (1.0 + var1 / 32_768.0) * self.p1();
        if var1 == 0.0 {
            return None;
        }
        let mut p = 1_048_576.0 - f64::from(adc_p);
        p = (p - var2 / 4_096.0) * 6_250.0 / var1;
        let var1 = self.pn(9) * p * p / 2_147_483_648.0;
        let var2 = p * self.pn(8) / 32_768.0;
        Some((p + (var1 + var2 + self.pn(7)) / 16.0) / 100.0)
    }

    /// Relative humidity in percent, clamped to 0–100.
    pub fn humidity(&self, adc_h: i32, t_fine: f64) -> f64 {
        let mut h = t_fine - 76_800.0;
        h = (f64::from(adc_h) - (f64::from(self.h4) * 64.0 + f64::from(self.h5) / 16_384.0 * h))
            * (f64::from(self.h2) / 65_536.0
                * (1.0
                    + f64::from(self.h6) / 67_108_864.0
                        * h
                        * (1.0 + f64::from(self.h3) / 67_108_864.0 * h)));
        h *= 1.0 - f64::from(self.h1) * h / 524_288.0;
        h.clamp(0.0, 100.0)
    }
}

/// One compensated conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtmosphereReading {
    pub temperature_c: f32,
    pub pressure_hpa: f32,
    pub humidity_pct: f32,
}

impl AtmosphereReading {
    pub fn value(&self, quantity: Quantity) -> Option<Value> {
        match quantity {
            Quantity::Pressure => Some(Value::Pressure(self.pressure_hpa)),
            Quantity::Humidity => Some(Value::Humidity(self.humidity_pct)),
            Quantity::Temperature => Some(Value::Temperature(self.temperature_c)),
            Quantity::Moisture | Quantity::Illuminance => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Driver
// ───────────────────────────────────────────────────────────────

pub struct Bme280<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    /// Read on first use and after any bus error.
    calibration: Option<Calibration>,
}

impl<I: I2c, D: DelayNs> Bme280<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            calibration: None,
        }
    }

    /// Trigger a forced conversion and compensate all three values.
    pub fn measure(&mut self) -> Result<AtmosphereReading, SensorFault> {
        let result = self.measure_inner();
        if matches!(result, Err(SensorFault::Bus | SensorFault::Disconnected)) {
            self.calibration = None;
        }
        result
    }

    fn measure_inner(&mut self) -> Result<AtmosphereReading, SensorFault> {
        let calibration = match self.calibration {
            Some(c) => c,
            None => {
                let c = self.init()?;
                self.calibration = Some(c);
                c
            }
        };

        self.write_reg(REG_CTRL_HUM, CTRL_HUM_X1)?;
        self.write_reg(REG_CTRL_MEAS, CTRL_MEAS_FORCED_X1)?;
        self.delay.delay_ms(CONVERSION_MS);
        let mut ready = false;
        for _ in 0..STATUS_POLLS {
            if self.read_reg(REG_STATUS)? & STATUS_MEASURING == 0 {
                ready = true;
                break;
            }
            self.delay.delay_ms(2);
        }
        if !ready {
            return Err(SensorFault::NotReady);
        }

        let mut data = [0u8; 8];
        self.read_regs(REG_DATA, &mut data)?;
        let adc_p = (i32::from(data[0]) << 12) | (i32::from(data[1]) << 4) | (i32::from(data[2]) >> 4);
        let adc_t = (i32::from(data[3]) << 12) | (i32::from(data[4]) << 4) | (i32::from(data[5]) >> 4);
        let adc_h = (i32::from(data[6]) << 8) | i32::from(data[7]);

        let (temperature, t_fine) = calibration.temperature(adc_t);
        let pressure = calibration
            .pressure(adc_p, t_fine)
            .ok_or(SensorFault::Malformed)?;
        let humidity = calibration.humidity(adc_h, t_fine);

        Ok(AtmosphereReading {
            temperature_c: temperature as f32,
            pressure_hpa: pressure as f32,
            humidity_pct: humidity as f32,
        })
    }

    fn init(&mut self) -> Result<Calibration, SensorFault> {
        if self.read_reg(REG_CHIP_ID)? != CHIP_ID {
            return Err(SensorFault::Disconnected);
        }
        let mut block0 = [0u8; 26];
        let mut block1 = [0u8; 7];
        self.read_regs(REG_CALIB_00, &mut block0)?;
        self.read_regs(REG_CALIB_26, &mut block1)?;
        Ok(Calibration::from_registers(&block0, &block1))
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), SensorFault> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|_| SensorFault::Bus)
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, SensorFault> {
        let mut buf = [0u8; 1];
        self.read_regs(reg, &mut buf)?;
        Ok(buf[0])
    }

    fn read_regs(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), SensorFault> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(|_| SensorFault::Bus)
    }
}

// ───────────────────────────────────────────────────────────────
// Per-quantity channel view
// ───────────────────────────────────────────────────────────────

pub type SharedBme280<I, D> = Arc<Mutex<Bme280<I, D>>>;

/// One quantity of a shared BME280.
pub struct Bme280Channel<I, D> {
    chip: SharedBme280<I, D>,
    quantity: Quantity,
}

impl<I, D> Bme280Channel<I, D> {
    pub fn new(chip: SharedBme280<I, D>, quantity: Quantity) -> Self {
        Self { chip, quantity }
    }
}

impl<I, D> SensorDevice for Bme280Channel<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn sample(&mut self) -> Result<Value, SensorFault> {
        let reading = self
            .chip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .measure()?;
        reading.value(self.quantity).ok_or(SensorFault::Malformed)
    }
}
