//! Byte-stream transport abstraction.
//!
//! The driver only needs three capabilities from a link: write bytes, read
//! whatever arrives before the timeout, and change the bit rate in place.
//! `SerialTransport` provides them over a real port; tests inject
//! [`crate::mock::MockSpectrometer`].

use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use crate::errors::{DriverError, Result};

/// Bidirectional byte link with a mutable baud rate and a fixed read timeout.
pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Read into `buf`, returning the number of bytes received.
    ///
    /// `Ok(0)` means the read timed out with nothing available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Retune the local bit rate without closing the link.
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    fn baud_rate(&self) -> u32;

    /// Read until `max` bytes have arrived or a read times out.
    fn read_up_to(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let mut filled = 0;
        while filled < max {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Read until `terminator` has been received, `max` bytes have arrived, or
    /// a read times out, whichever comes first.
    fn read_until(&mut self, terminator: &[u8], max: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(max);
        let mut byte = [0u8; 1];
        while out.len() < max {
            if self.read(&mut byte)? == 0 {
                break;
            }
            out.push(byte[0]);
            if out.ends_with(terminator) {
                break;
            }
        }
        Ok(out)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }
}

/// Serial port transport backed by `serialport`.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    baud: u32,
}

impl SerialTransport {
    /// Open `path` at `baud` with the given read timeout.
    pub fn open(path: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .open()
            .map_err(|source| DriverError::Open {
                port: path.to_string(),
                source,
            })?;
        debug!("Opened {} at {} baud (timeout {:?})", path, baud, timeout);
        Ok(Self { port, baud })
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(&mut self.port, buf)?;
        Write::flush(&mut self.port)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match Read::read(&mut self.port, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        SerialPort::set_baud_rate(self.port.as_mut(), baud)?;
        debug!("Port retuned {} -> {} baud", self.baud, baud);
        self.baud = baud;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud
    }
}
