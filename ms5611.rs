//! Driver for the MS5611 barometric pressure sensor.
//!
//! The sensor has no data-ready flag: a conversion is started with a one-byte
//! command, the host waits out the conversion time and then reads the 24-bit
//! result from the ADC register.

use std::convert::TryFrom;

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, info};

use crate::bus::BusTransport;
use crate::structs::{PromCoefficients, Reading};
use crate::{Error, Result};

// I2C slave address with CSB tied high.
pub const ADDR_MS5611: u16 = 0x77;

const REG_ADC: u8 = 0x00;
const REG_PROM_C1: u8 = 0xA2;
const CMD_CONVERT_D1: u8 = 0x40;
const CMD_CONVERT_D2: u8 = 0x50;

/// ADC oversampling ratio of a single conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Osr256,
    Osr512,
    Osr1024,
    Osr2048,
    Osr4096,
}

impl Oversampling {
    fn command_bits(self) -> u8 {
        match self {
            Oversampling::Osr256 => 0x00,
            Oversampling::Osr512 => 0x02,
            Oversampling::Osr1024 => 0x04,
            Oversampling::Osr2048 => 0x06,
            Oversampling::Osr4096 => 0x08,
        }
    }

    /// Worst-case conversion time from the datasheet, rounded up.
    pub fn conversion_ms(self) -> u32 {
        match self {
            Oversampling::Osr256 => 1,
            Oversampling::Osr512 => 2,
            Oversampling::Osr1024 => 3,
            Oversampling::Osr2048 => 5,
            Oversampling::Osr4096 => 10,
        }
    }
}

impl Default for Oversampling {
    fn default() -> Self {
        Oversampling::Osr4096
    }
}

impl TryFrom<u16> for Oversampling {
    type Error = Error;

    fn try_from(ratio: u16) -> Result<Self> {
        match ratio {
            256 => Ok(Oversampling::Osr256),
            512 => Ok(Oversampling::Osr512),
            1024 => Ok(Oversampling::Osr1024),
            2048 => Ok(Oversampling::Osr2048),
            4096 => Ok(Oversampling::Osr4096),
            other => Err(Error::Configuration(format!(
                "MS5611 oversampling must be one of 256, 512, 1024, 2048, 4096, got {}",
                other
            ))),
        }
    }
}

pub struct Ms5611<B, D> {
    bus: B,
    delay: D,
    oversampling: Oversampling,
    prom: PromCoefficients,
    reading: Reading,
    // reused for every ADC and PROM transfer
    scratch: [u8; 3],
}

impl<B, D> Ms5611<B, D>
where
    B: BusTransport,
    D: DelayMs<u32>,
{
    /// Load the factory calibration and take a first reading.
    ///
    /// Nothing works without calibration, so a bus fault here is returned as
    /// is and not retried.
    pub fn new(bus: B, delay: D, oversampling: Oversampling) -> Result<Self> {
        let mut sensor = Self {
            bus,
            delay,
            oversampling,
            prom: PromCoefficients::default(),
            reading: Reading::default(),
            scratch: [0; 3],
        };
        sensor.prom = sensor.read_prom()?;
        info!("MS5611 calibration loaded: {:?}", sensor.prom);
        sensor.update()?;
        Ok(sensor)
    }

    fn read_prom(&mut self) -> Result<PromCoefficients> {
        let mut words = [0u16; 6];
        for (n, word) in words.iter_mut().enumerate() {
            let register = REG_PROM_C1 + 2 * n as u8;
            self.bus.read_memory(register, &mut self.scratch[..2])?;
            *word = u16::from_be_bytes([self.scratch[0], self.scratch[1]]);
        }
        Ok(PromCoefficients {
            sens_t1: words[0],
            off_t1: words[1],
            tcs: words[2],
            tco: words[3],
            t_ref: words[4],
            tempsens: words[5],
        })
    }

    fn convert(&mut self, command: u8) -> Result<u32> {
        self.bus.write_raw(&[command | self.oversampling.command_bits()])?;
        self.delay.delay_ms(self.oversampling.conversion_ms());
        self.bus.read_memory(REG_ADC, &mut self.scratch)?;
        let [msb, mid, lsb] = self.scratch;
        Ok(u32::from(msb) << 16 | u32::from(mid) << 8 | u32::from(lsb))
    }

    /// Run one pressure + temperature conversion and compensate it.
    ///
    /// On error the previous reading stays in place.
    pub fn update(&mut self) -> Result<()> {
        let d1 = self.convert(CMD_CONVERT_D1)?;
        let d2 = self.convert(CMD_CONVERT_D2)?;
        self.reading = compensate(&self.prom, d1, d2);
        debug!("MS5611 D1={} D2={} -> {}", d1, d2, self.reading);
        Ok(())
    }

    /// Most recent compensated reading, pressure in Pa.
    pub fn reading(&self) -> Reading {
        self.reading
    }

    pub fn calibration(&self) -> &PromCoefficients {
        &self.prom
    }

    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }
}

/// Datasheet compensation with the second-order correction below 20 °C.
///
/// Below -15 °C the extra offset/sensitivity terms are added on top of the
/// low-temperature ones.
pub fn compensate(prom: &PromCoefficients, d1: u32, d2: u32) -> Reading {
    let c1 = f64::from(prom.sens_t1);
    let c2 = f64::from(prom.off_t1);
    let c3 = f64::from(prom.tcs);
    let c4 = f64::from(prom.tco);
    let c5 = f64::from(prom.t_ref);
    let c6 = f64::from(prom.tempsens);
    let d1 = f64::from(d1);
    let d2 = f64::from(d2);

    let dt = d2 - c5 * 256.0;
    let mut temp = 2000.0 + dt * c6 / 8_388_608.0;
    let mut off = c2 * 65_536.0 + c4 * dt / 128.0;
    let mut sens = c1 * 32_768.0 + c3 * dt / 256.0;

    let (mut t2, mut off2, mut sens2) = (0.0, 0.0, 0.0);
    if temp < 2000.0 {
        t2 = dt * dt / 2_147_483_648.0;
        off2 = 5.0 * (temp - 2000.0).powi(2) / 2.0;
        sens2 = off2 / 2.0;
        if temp < -1500.0 {
            off2 += 7.0 * (temp + 1500.0).powi(2);
            sens2 += 11.0 * (temp + 1500.0).powi(2) / 2.0;
        }
    }
    temp -= t2;
    off -= off2;
    sens -= sens2;

    let pressure = (d1 * sens / 2_097_152.0 - off) / 32_768.0;
    Reading {
        temperature: temp / 100.0,
        pressure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{CountingDelay, MockBus, Transfer};
    use approx::assert_abs_diff_eq;

    // Example calibration and conversion from the MS5611-01BA03 datasheet.
    const DATASHEET_PROM: PromCoefficients = PromCoefficients {
        sens_t1: 40127,
        off_t1: 36924,
        tcs: 23317,
        tco: 23282,
        t_ref: 33464,
        tempsens: 28312,
    };
    const D1: u32 = 9_085_466;
    const D2: u32 = 8_569_150;

    fn adc(word: u32) -> [u8; 3] {
        let bytes = word.to_be_bytes();
        [bytes[1], bytes[2], bytes[3]]
    }

    fn scripted_bus() -> MockBus {
        let mut bus = MockBus::new();
        let prom = [
            DATASHEET_PROM.sens_t1,
            DATASHEET_PROM.off_t1,
            DATASHEET_PROM.tcs,
            DATASHEET_PROM.tco,
            DATASHEET_PROM.t_ref,
            DATASHEET_PROM.tempsens,
        ];
        for (n, word) in prom.iter().enumerate() {
            bus.respond(REG_PROM_C1 + 2 * n as u8, &word.to_be_bytes());
        }
        bus.respond(REG_ADC, &adc(D1)).respond(REG_ADC, &adc(D2));
        bus
    }

    #[test]
    fn datasheet_example() {
        let reading = compensate(&DATASHEET_PROM, D1, D2);
        assert_abs_diff_eq!(reading.temperature, 20.07, epsilon = 0.01);
        assert_abs_diff_eq!(reading.pressure, 100_009.0, epsilon = 1.0);
        assert_abs_diff_eq!(reading.pressure_hpa(), 1000.09, epsilon = 0.01);
    }

    #[test]
    fn low_temperature_correction() {
        // TEMP = 87.07 (0.87 °C): only the first correction applies.
        let reading = compensate(&DATASHEET_PROM, D1, 8_000_000);
        assert_abs_diff_eq!(reading.temperature, -0.625172, epsilon = 1e-5);
        assert_abs_diff_eq!(reading.pressure, 95_989.05, epsilon = 0.01);
    }

    #[test]
    fn very_low_temperature_adds_both_corrections() {
        // TEMP = -6663 (-66.6 °C). The low-temperature terms alone would give
        // ~76655 Pa.
        let reading = compensate(&DATASHEET_PROM, D1, 6_000_000);
        assert_abs_diff_eq!(reading.temperature, -97.309866, epsilon = 1e-5);
        assert_abs_diff_eq!(reading.pressure, 62_965.93, epsilon = 0.01);
    }

    #[test]
    fn loads_prom_and_reads_on_construction() {
        let sensor = Ms5611::new(scripted_bus(), CountingDelay::default(), Oversampling::Osr4096)
            .unwrap();
        assert_eq!(sensor.calibration(), &DATASHEET_PROM);
        assert_abs_diff_eq!(sensor.reading().pressure, 100_009.07, epsilon = 0.01);

        let (bus, delay) = sensor.release();
        assert_eq!(
            bus.writes(),
            vec![Transfer::WriteRaw(vec![0x48]), Transfer::WriteRaw(vec![0x58])]
        );
        assert_eq!(bus.reads_of(REG_ADC), 2);
        assert_eq!(delay.calls, 2);
        assert_eq!(delay.total_ms, 20);
    }

    #[test]
    fn oversampling_sets_command_and_wait() {
        let sensor =
            Ms5611::new(scripted_bus(), CountingDelay::default(), Oversampling::Osr256).unwrap();
        let (bus, delay) = sensor.release();
        assert_eq!(
            bus.writes(),
            vec![Transfer::WriteRaw(vec![0x40]), Transfer::WriteRaw(vec![0x50])]
        );
        assert_eq!(delay.total_ms, 2);
    }

    #[test]
    fn rejects_unknown_oversampling() {
        assert_eq!(Oversampling::try_from(1024u16).unwrap(), Oversampling::Osr1024);
        assert!(matches!(
            Oversampling::try_from(300u16),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn calibration_fault_is_fatal() {
        let mut bus = scripted_bus();
        bus.fail = true;
        let result = Ms5611::new(bus, CountingDelay::default(), Oversampling::default());
        assert!(matches!(result, Err(Error::Bus(_))));
    }

    #[test]
    fn bus_fault_keeps_previous_reading() {
        let mut sensor =
            Ms5611::new(scripted_bus(), CountingDelay::default(), Oversampling::default())
                .unwrap();
        let before = sensor.reading();

        sensor.bus.fail = true;
        assert!(matches!(sensor.update(), Err(Error::Bus(_))));
        assert_eq!(sensor.reading(), before);

        // the ADC script is down to D2 only, so both conversions return it
        sensor.bus.fail = false;
        sensor.update().unwrap();
        assert_eq!(sensor.reading(), compensate(&DATASHEET_PROM, D2, D2));
    }

    #[test]
    fn fault_after_first_conversion_keeps_previous_reading() {
        let mut sensor =
            Ms5611::new(scripted_bus(), CountingDelay::default(), Oversampling::default())
                .unwrap();
        let before = sensor.reading();

        // D1 is triggered and read, then the D2 trigger fails
        sensor.bus.fail_after = Some(sensor.bus.transfers.len() + 2);
        assert!(matches!(sensor.update(), Err(Error::Bus(_))));
        assert_eq!(sensor.reading(), before);

        let (bus, _) = sensor.release();
        assert_eq!(bus.reads_of(REG_ADC), 3);
        assert_eq!(
            bus.writes()[2..],
            [Transfer::WriteRaw(vec![0x48])]
        );
    }
}
