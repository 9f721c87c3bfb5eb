use std::io;

use rppal::i2c::I2c;

use crate::Result;

/// Byte-oriented access to one device on a register bus.
///
/// Every method is a complete bus transaction; a driver that needs several
/// of them in a row holds `&mut self` for the whole sequence.
pub trait BusTransport {
    /// Fill `buffer` with the registers starting at `register`.
    fn read_memory(&mut self, register: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write `bytes` to the registers starting at `register`.
    fn write_memory(&mut self, register: u8, bytes: &[u8]) -> Result<()>;

    /// Write `bytes` without a register prefix (command bytes).
    fn write_raw(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read `buffer.len()` bytes without addressing a register first.
    fn read_raw(&mut self, buffer: &mut [u8]) -> Result<()>;
}

/// A Linux I2C adapter bound to one slave address.
pub struct I2cBus {
    i2c: I2c,
}

impl I2cBus {
    /// Open `/dev/i2c-<bus>` and address `address` on it.
    pub fn open(bus: u8, address: u16) -> Result<Self> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(address)?;
        Ok(Self { i2c })
    }
}

impl BusTransport for I2cBus {
    fn read_memory(&mut self, register: u8, buffer: &mut [u8]) -> Result<()> {
        self.i2c.write_read(&[register], buffer)?;
        Ok(())
    }

    fn write_memory(&mut self, register: u8, bytes: &[u8]) -> Result<()> {
        self.i2c.block_write(register, bytes)?;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.i2c.write(bytes)?;
        check_length(written, bytes.len())
    }

    fn read_raw(&mut self, buffer: &mut [u8]) -> Result<()> {
        let read = self.i2c.read(buffer)?;
        check_length(read, buffer.len())
    }
}

fn check_length(transferred: usize, expected: usize) -> Result<()> {
    if transferred == expected {
        Ok(())
    } else {
        let error = io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short transfer: {} of {} bytes", transferred, expected),
        );
        Err(rppal::i2c::Error::Io(error).into())
    }
}
