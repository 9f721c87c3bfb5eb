//! Flight-data-acquisition core of the CanSat payload.
//!
//! Two barometric sensors (MS5611 and BME280) are read over I2C, compensated
//! into physical units, merged with the GPS fix into one record per cycle and
//! buffered before being appended to the session file on the SD card.

pub mod altitude;
pub mod bme280;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod error;
pub mod ms5611;
pub mod payload;
pub mod storage;
pub mod structs;

pub use error::{Error, Result};
