//! Initialization-time constants, loaded from a JSON file.
//!
//! Every field has a default, so an empty object `{}` is a valid
//! configuration and no file at all gives the flight defaults.

use std::convert::TryFrom;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::altitude::SEALEVEL_PA;
use crate::bme280::{self, OversamplingMode};
use crate::buffer::DEFAULT_CAPACITY;
use crate::ms5611;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ms5611: Ms5611Config,
    pub bme280: Bme280Config,
    pub buffer_capacity: usize,
    /// Reference pressure for altitude, Pa.
    pub sealevel_pa: f64,
    /// When set, the reference is derived at startup from the MS5611
    /// pressure and this launch-site altitude instead of `sealevel_pa`.
    pub launch_altitude_m: Option<f64>,
    pub storage: StorageConfig,
    pub sample_interval_ms: u64,
    /// Stop after this many cycles; run forever when absent.
    pub max_cycles: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ms5611: Ms5611Config::default(),
            bme280: Bme280Config::default(),
            buffer_capacity: DEFAULT_CAPACITY,
            sealevel_pa: SEALEVEL_PA,
            launch_altitude_m: None,
            storage: StorageConfig::default(),
            sample_interval_ms: 1000,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ms5611Config {
    pub bus: u8,
    pub address: u16,
    pub oversampling: u16,
}

impl Default for Ms5611Config {
    fn default() -> Self {
        Self {
            bus: 0,
            address: ms5611::ADDR_MS5611,
            oversampling: 4096,
        }
    }
}

impl Ms5611Config {
    pub fn oversampling(&self) -> Result<ms5611::Oversampling> {
        ms5611::Oversampling::try_from(self.oversampling)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bme280Config {
    pub bus: u8,
    pub address: u16,
    pub oversampling: OversamplingSetting,
}

impl Default for Bme280Config {
    fn default() -> Self {
        Self {
            bus: 1,
            address: bme280::ADDR_BME280,
            oversampling: OversamplingSetting::Uniform(8),
        }
    }
}

impl Bme280Config {
    pub fn oversampling(&self) -> Result<OversamplingMode> {
        match self.oversampling {
            OversamplingSetting::Uniform(level) => OversamplingMode::uniform(level),
            OversamplingSetting::PerChannel([humidity, temperature, pressure]) => {
                OversamplingMode::per_channel(humidity, temperature, pressure)
            }
        }
    }
}

/// BME280 oversampling as written in the file: one factor for all channels
/// (`8`) or `[humidity, temperature, pressure]` (`[1, 2, 16]`).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OversamplingSetting {
    Uniform(u8),
    PerChannel([u8; 3]),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Mount point of the SD card.
    pub root: PathBuf,
    pub session: String,
    pub file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sd"),
            session: "session".to_string(),
            file: "data.csv".to_string(),
        }
    }
}

impl Config {
    /// Read the configuration from `path`, or use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::Configuration(format!("cannot open {}: {}", path.display(), e))
                })?;
                serde_json::from_reader(BufReader::new(file))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked before touching hardware.
    pub fn validate(&self) -> Result<()> {
        self.ms5611.oversampling()?;
        self.bme280.oversampling()?;
        if self.buffer_capacity == 0 {
            return Err(Error::Configuration(
                "buffer_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.sealevel_pa.is_finite() && self.sealevel_pa > 0.0) {
            return Err(Error::Configuration(format!(
                "sealevel_pa must be positive, got {}",
                self.sealevel_pa
            )));
        }
        Ok(())
    }
}
