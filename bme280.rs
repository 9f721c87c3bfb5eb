use std::convert::TryFrom;

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info, warn};

use crate::bus::BusTransport;
use crate::structs::{CalibParams, EnvData, Reading};
use crate::{Error, Result};

// BME280 I2C slave address with SDO tied high.
pub const ADDR_BME280: u16 = 0x77;

// BME280 register addresses.
// cf. https://trac.switch-science.com/wiki/BME280
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_26: u8 = 0xE1;
const REG_CALIB_00_LEN: usize = 26;
const REG_CALIB_26_LEN: usize = 7;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_ADC_VALUE: u8 = 0xF7;
const REG_ADC_VALUE_LEN: usize = 8;

const STATUS_MEASURING: u8 = 0x08;
const MODE_SLEEP: u8 = 0;
const MODE_FORCED: u8 = 1;

// 100 polls of 10 ms, about one second.
const READY_POLLS: u32 = 100;
const READY_POLL_MS: u32 = 10;

/// Oversampling of one BME280 channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

impl TryFrom<u8> for Oversampling {
    type Error = Error;

    /// Takes the oversampling factor, not the register code.
    fn try_from(factor: u8) -> Result<Self> {
        match factor {
            1 => Ok(Oversampling::X1),
            2 => Ok(Oversampling::X2),
            4 => Ok(Oversampling::X4),
            8 => Ok(Oversampling::X8),
            16 => Ok(Oversampling::X16),
            other => Err(Error::Configuration(format!(
                "BME280 oversampling must be one of 1, 2, 4, 8, 16, got {}",
                other
            ))),
        }
    }
}

/// Oversampling for the humidity, temperature and pressure channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversamplingMode {
    Uniform(Oversampling),
    PerChannel {
        humidity: Oversampling,
        temperature: Oversampling,
        pressure: Oversampling,
    },
}

impl OversamplingMode {
    pub fn uniform(factor: u8) -> Result<Self> {
        Ok(OversamplingMode::Uniform(Oversampling::try_from(factor)?))
    }

    pub fn per_channel(humidity: u8, temperature: u8, pressure: u8) -> Result<Self> {
        Ok(OversamplingMode::PerChannel {
            humidity: Oversampling::try_from(humidity)?,
            temperature: Oversampling::try_from(temperature)?,
            pressure: Oversampling::try_from(pressure)?,
        })
    }

    pub fn humidity(&self) -> Oversampling {
        match *self {
            OversamplingMode::Uniform(level) => level,
            OversamplingMode::PerChannel { humidity, .. } => humidity,
        }
    }

    pub fn temperature(&self) -> Oversampling {
        match *self {
            OversamplingMode::Uniform(level) => level,
            OversamplingMode::PerChannel { temperature, .. } => temperature,
        }
    }

    pub fn pressure(&self) -> Oversampling {
        match *self {
            OversamplingMode::Uniform(level) => level,
            OversamplingMode::PerChannel { pressure, .. } => pressure,
        }
    }

    fn ctrl_meas(&self, mode: u8) -> u8 {
        (self.temperature() as u8) << 5 | (self.pressure() as u8) << 2 | mode
    }
}

impl Default for OversamplingMode {
    fn default() -> Self {
        OversamplingMode::Uniform(Oversampling::X8)
    }
}

pub struct Bme280<B, D> {
    bus: B,
    delay: D,
    mode: OversamplingMode,
    calib: CalibParams,
    reading: Reading,
    humidity: f64,
    t_fine: i32,
    // register buffers that stay allocated between cycles
    ctrl: [u8; 1],
    adc: [u8; REG_ADC_VALUE_LEN],
}

impl<B, D> Bme280<B, D>
where
    B: BusTransport,
    D: DelayMs<u32>,
{
    /// Load the factory calibration, put the sensor to sleep and take a
    /// first forced reading, so no record ever carries a zeroed one.
    pub fn new(bus: B, delay: D, mode: OversamplingMode) -> Result<Self> {
        let mut sensor = Self {
            bus,
            delay,
            mode,
            calib: CalibParams::default(),
            reading: Reading::default(),
            humidity: 0.0,
            t_fine: 0,
            ctrl: [0],
            adc: [0; REG_ADC_VALUE_LEN],
        };
        sensor.calib = sensor.read_calib()?;
        info!("BME280 calibration loaded: {:?}", sensor.calib);

        sensor.ctrl[0] = mode.ctrl_meas(MODE_SLEEP);
        sensor.bus.write_memory(REG_CTRL_MEAS, &sensor.ctrl)?;
        sensor.update()?;
        Ok(sensor)
    }

    fn read_calib(&mut self) -> Result<CalibParams> {
        let mut block_a = [0u8; REG_CALIB_00_LEN];
        let mut block_b = [0u8; REG_CALIB_26_LEN];
        // 0x88 - 0xA1
        self.bus.read_memory(REG_CALIB_00, &mut block_a)?;
        // 0xE1 - 0xE7
        self.bus.read_memory(REG_CALIB_26, &mut block_b)?;
        Ok(unpack_calib(&block_a, &block_b))
    }

    /// Trigger a forced conversion, wait for it and compensate the result.
    ///
    /// Fails with [`Error::SensorNotReady`] if the sensor is still measuring
    /// after about a second. The previous reading is kept on any error.
    pub fn update(&mut self) -> Result<()> {
        self.ctrl[0] = self.mode.humidity() as u8;
        self.bus.write_memory(REG_CTRL_HUM, &self.ctrl)?;
        self.ctrl[0] = self.mode.ctrl_meas(MODE_FORCED);
        self.bus.write_memory(REG_CTRL_MEAS, &self.ctrl)?;

        self.wait_ready()?;

        // burst readout 0xF7 - 0xFE, recommended by the datasheet
        self.bus.read_memory(REG_ADC_VALUE, &mut self.adc)?;
        let raw = unpack_adc(&self.adc);

        let (temperature, t_fine) = compute_temperature(&self.calib, raw.temperature);
        let pressure = compute_pressure(&self.calib, raw.pressure, t_fine);
        self.humidity = compute_humidity(&self.calib, raw.humidity, t_fine);
        self.t_fine = t_fine;
        self.reading = Reading {
            temperature,
            pressure,
        };
        debug!(
            "BME280 {:?} -> {}, {:.2} %",
            raw, self.reading, self.humidity
        );
        Ok(())
    }

    fn wait_ready(&mut self) -> Result<()> {
        for _ in 0..READY_POLLS {
            self.bus.read_memory(REG_STATUS, &mut self.ctrl)?;
            if self.ctrl[0] & STATUS_MEASURING == 0 {
                return Ok(());
            }
            self.delay.delay_ms(READY_POLL_MS);
        }
        warn!("BME280 still measuring after {} polls", READY_POLLS);
        Err(Error::SensorNotReady)
    }

    /// Most recent compensated reading, pressure in Pa.
    pub fn reading(&self) -> Reading {
        self.reading
    }

    /// Most recent relative humidity in percent.
    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn t_fine(&self) -> i32 {
        self.t_fine
    }

    pub fn calibration(&self) -> &CalibParams {
        &self.calib
    }

    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }
}

/// Unpack the two calibration blocks.
///
/// Block A is `<u16 i16 i16 u16 i16*8 pad u8>`, block B `<i16 u8 i8 i16 i8>`.
/// H4 and H5 share the nibbles of 0xE5 and are unfolded with their sign.
pub fn unpack_calib(a: &[u8; REG_CALIB_00_LEN], b: &[u8; REG_CALIB_26_LEN]) -> CalibParams {
    let u16_at = |n: usize| u16::from_le_bytes([a[n], a[n + 1]]);
    let i16_at = |n: usize| i16::from_le_bytes([a[n], a[n + 1]]);

    let h4 = b[3] as i8;
    let h5 = i16::from_le_bytes([b[4], b[5]]);

    CalibParams {
        t1: u16_at(0),
        t2: i16_at(2),
        t3: i16_at(4),
        p1: u16_at(6),
        p2: i16_at(8),
        p3: i16_at(10),
        p4: i16_at(12),
        p5: i16_at(14),
        p6: i16_at(16),
        p7: i16_at(18),
        p8: i16_at(20),
        p9: i16_at(22),
        // a[24] is unused
        h1: a[25],
        h2: i16::from_le_bytes([b[0], b[1]]),
        h3: b[2],
        h4: i16::from(h4) * 16 + (h5 & 0x0F),
        h5: h5 >> 4,
        h6: b[6] as i8,
    }
}

fn unpack_adc(data: &[u8; REG_ADC_VALUE_LEN]) -> EnvData {
    let word = |n: usize| {
        (u32::from(data[n]) << 16 | u32::from(data[n + 1]) << 8 | u32::from(data[n + 2])) >> 4
    };
    EnvData {
        pressure: word(0),
        temperature: word(3),
        humidity: u32::from(data[6]) << 8 | u32::from(data[7]),
    }
}

/// Temperature in °C clamped to [-40, 85], and t_fine.
pub fn compute_temperature(calib: &CalibParams, raw_value: u32) -> (f64, i32) {
    let raw = f64::from(raw_value);
    let t1 = f64::from(calib.t1);
    let v1 = (raw / 16384.0 - t1 / 1024.0) * f64::from(calib.t2);
    let v2 = (raw / 131072.0 - t1 / 8192.0) * (raw / 131072.0 - t1 / 8192.0) * f64::from(calib.t3);
    let t_fine = (v1 + v2) as i32;
    let temperature = ((v1 + v2) / 5120.0).max(-40.0).min(85.0);
    (temperature, t_fine)
}

/// Pressure in Pa clamped to [30000, 110000].
pub fn compute_pressure(calib: &CalibParams, raw_value: u32, t_fine: i32) -> f64 {
    let mut v1 = f64::from(t_fine) / 2.0 - 64000.0;
    let mut v2 = v1 * v1 * f64::from(calib.p6) / 32768.0 + v1 * f64::from(calib.p5) * 2.0;
    v2 = v2 / 4.0 + f64::from(calib.p4) * 65536.0;
    v1 = (f64::from(calib.p3) * v1 * v1 / 524288.0 + f64::from(calib.p2) * v1) / 524288.0;
    v1 = (1.0 + v1 / 32768.0) * f64::from(calib.p1);
    if v1 == 0.0 {
        // avoid division by zero
        return 30000.0;
    }
    let p = ((1048576.0 - f64::from(raw_value)) - v2 / 4096.0) * 6250.0 / v1;
    v1 = f64::from(calib.p9) * p * p / 2147483648.0;
    v2 = p * f64::from(calib.p8) / 32768.0;
    let pressure = p + (v1 + v2 + f64::from(calib.p7)) / 16.0;
    pressure.max(30000.0).min(110000.0)
}

/// Relative humidity in percent clamped to [0, 100].
pub fn compute_humidity(calib: &CalibParams, raw_value: u32, t_fine: i32) -> f64 {
    let mut h = f64::from(t_fine) - 76800.0;
    if h == 0.0 {
        return 0.0;
    }
    h = (f64::from(raw_value) - (f64::from(calib.h4) * 64.0 + f64::from(calib.h5) / 16384.0 * h))
        * (f64::from(calib.h2) / 65536.0
            * (1.0 + f64::from(calib.h6) / 67108864.0 * h
                * (1.0 + f64::from(calib.h3) / 67108864.0 * h)));
    h *= 1.0 - f64::from(calib.h1) * h / 524288.0;
    h.max(0.0).min(100.0)
}
