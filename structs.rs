use std::fmt;

/// MS5611 factory calibration, PROM words C1..C6.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PromCoefficients {
    /// C1, pressure sensitivity
    pub sens_t1: u16,
    /// C2, pressure offset
    pub off_t1: u16,
    /// C3, temperature coefficient of pressure sensitivity
    pub tcs: u16,
    /// C4, temperature coefficient of pressure offset
    pub tco: u16,
    /// C5, reference temperature
    pub t_ref: u16,
    /// C6, temperature coefficient of the temperature
    pub tempsens: u16,
}

/// BME280 factory calibration (dig_T*, dig_P*, dig_H*).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CalibParams {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

/// Raw ADC words of one BME280 burst read.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EnvData {
    pub temperature: u32,
    pub pressure: u32,
    pub humidity: u32,
}

/// A compensated temperature/pressure pair.
///
/// Pressure is in Pascal, the native unit of both sensors.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub pressure: f64,
}

impl Reading {
    pub fn pressure_hpa(&self) -> f64 {
        self.pressure / 100.0
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.2} C, {:.2} hPa", self.temperature, self.pressure_hpa())
    }
}

/// An already decoded GPS fix, handed in by the receiver's parser.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub speed_knots: f64,
    pub fix_quality: u8,
    pub satellites: u8,
}

/// One barometer's contribution to a [`SampleRecord`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BaroSample {
    pub temperature: f64,
    pub pressure_hpa: f64,
    pub altitude_m: f64,
}

/// Everything logged for one sampling cycle.
///
/// Its `Display` form is the CSV line written to the SD card, without the
/// trailing newline:
/// `t_ms,ms_temp,ms_hpa,ms_alt,bme_temp,bme_hpa,bme_hum,bme_alt,lat,lon,gps_alt,fix,sats`
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub timestamp_ms: u64,
    pub ms5611: BaroSample,
    pub bme280: BaroSample,
    pub humidity: f64,
    pub gps: Option<GpsFix>,
}

impl fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},",
            self.timestamp_ms,
            self.ms5611.temperature,
            self.ms5611.pressure_hpa,
            self.ms5611.altitude_m,
            self.bme280.temperature,
            self.bme280.pressure_hpa,
            self.humidity,
            self.bme280.altitude_m,
        )?;
        match &self.gps {
            Some(gps) => write!(
                f,
                "{:.6},{:.6},{:.1},{},{}",
                gps.latitude, gps.longitude, gps.altitude_m, gps.fix_quality, gps.satellites
            ),
            None => write!(f, ",,,,"),
        }
    }
}
