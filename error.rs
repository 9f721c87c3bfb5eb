use std::fmt::{self, Display, Formatter};
use std::io;

/// Everything that can go wrong between the I2C bus and the SD card.
#[derive(Debug)]
pub enum Error {
    /// A bus transfer did not complete.
    Bus(rppal::i2c::Error),

    /// The BME280 kept its busy bit set for the whole polling window.
    SensorNotReady,

    /// An oversampling level, capacity or other construction parameter is
    /// out of range.
    Configuration(String),

    /// The configuration file could not be read or parsed.
    ConfigFile(serde_json::Error),

    /// The storage medium is present but the write failed.
    Storage(io::Error),

    /// No storage medium is mounted.
    StorageUnavailable,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Bus(error) => write!(f, "bus error: {}", error),
            Self::SensorNotReady => write!(f, "sensor did not finish its conversion in time"),
            Self::Configuration(reason) => write!(f, "invalid configuration: {}", reason),
            Self::ConfigFile(error) => write!(f, "cannot load configuration file: {}", error),
            Self::Storage(error) => write!(f, "storage error: {}", error),
            Self::StorageUnavailable => write!(f, "storage is not mounted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(error) => Some(error),
            Self::ConfigFile(error) => Some(error),
            Self::Storage(error) => Some(error),
            _ => None,
        }
    }
}

impl From<rppal::i2c::Error> for Error {
    fn from(error: rppal::i2c::Error) -> Self {
        Error::Bus(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::ConfigFile(error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
