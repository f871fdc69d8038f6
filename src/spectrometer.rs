//! BTC100 instrument session.
//!
//! A [`Spectrometer`] only exists once the link has been negotiated. It owns
//! the transport exclusively and caches the acquisition parameters it last
//! sent; the getters never query the instrument.
//!
//! # Scan timing
//!
//! The instrument says nothing until an acquisition finishes, and with long
//! integration or heavy averaging that can outlast the read timeout. Scans
//! therefore sleep for a settle delay before sending `S` whenever the
//! expected acquisition time is long enough to matter.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::command::CommandChannel;
use crate::config::LinkConfig;
use crate::decoder::{Spectrum, TransportBytes};
use crate::errors::Result;
use crate::negotiator::Negotiator;
use crate::protocol::{
    BaudCode, ASCII_FRAME_LEN, ASCII_READ_LIMIT, DEFAULT_AVERAGING, DEFAULT_INTEGRATION_MS,
    MAX_INTEGRATION_MS, MIN_INTEGRATION_MS, PIXEL_COUNT,
};
use crate::transport::{SerialTransport, Transport};

/// Settle delay in seconds is `SETTLE_FACTOR * averaging * integration_ms / SETTLE_DIVISOR`.
///
/// Tuned empirically on the instrument.
pub const SETTLE_FACTOR: f64 = 3.0;
pub const SETTLE_DIVISOR: f64 = 500.0;

/// Delays at or below this are skipped.
pub const SETTLE_THRESHOLD: Duration = Duration::from_secs(1);

/// Pre-scan delay in seconds, before the threshold is applied.
pub fn settle_seconds(averaging: u32, integration_ms: u32) -> f64 {
    SETTLE_FACTOR * f64::from(averaging) * f64::from(integration_ms) / SETTLE_DIVISOR
}

/// Pre-scan delay to sleep for, if any.
pub fn settle_delay(averaging: u32, integration_ms: u32) -> Option<Duration> {
    let delay = Duration::from_secs_f64(settle_seconds(averaging, integration_ms));
    (delay > SETTLE_THRESHOLD).then_some(delay)
}

/// Clamp an integration time to what the instrument accepts.
pub fn clamp_integration(ms: u32) -> u32 {
    ms.clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS)
}

/// Connected BTC100 spectrometer.
///
/// # Example
/// ```ignore
/// let mut spec = Spectrometer::connect(&LinkConfig::new("/dev/ttyUSB0"))?;
/// spec.set_integration(200)?;
/// let spectrum = spec.scan()?;
/// println!("peak: {:?}", spectrum.iter().max());
/// spec.close();
/// ```
pub struct Spectrometer<T: Transport> {
    channel: CommandChannel<T>,
    averaging: u32,
    integration_ms: u32,
}

impl Spectrometer<SerialTransport> {
    /// Open the configured port, negotiate the link and apply defaults.
    pub fn connect(config: &LinkConfig) -> Result<Self> {
        let channel = Negotiator::open(config)?.run()?;
        Self::from_channel(channel)
    }
}

impl<T: Transport> Spectrometer<T> {
    /// Negotiate over an already opened transport and apply defaults.
    pub fn negotiate(transport: T) -> Result<Self> {
        let channel = Negotiator::new(transport).run()?;
        Self::from_channel(channel)
    }

    /// Wrap a verified channel, sending averaging 1 and integration 50 ms.
    ///
    /// Only reachable through negotiation; an unverified link would cache
    /// parameters the instrument never understood.
    pub(crate) fn from_channel(channel: CommandChannel<T>) -> Result<Self> {
        let mut spec = Self {
            channel,
            averaging: DEFAULT_AVERAGING,
            integration_ms: DEFAULT_INTEGRATION_MS,
        };
        spec.set_averaging(DEFAULT_AVERAGING)?;
        spec.set_integration(DEFAULT_INTEGRATION_MS)?;
        info!(
            "Spectrometer ready at {} baud",
            spec.channel.transport().baud_rate()
        );
        Ok(spec)
    }

    // ------------------------------------------------------------------------
    // Acquisition parameters
    // ------------------------------------------------------------------------

    /// Set the integration time, clamped to 50..=65000 ms.
    ///
    /// Returns the value actually sent.
    pub fn set_integration(&mut self, ms: u32) -> Result<u32> {
        let ms = clamp_integration(ms);
        self.channel.set_integration(ms)?;
        self.integration_ms = ms;
        debug!("Integration time set to {} ms", ms);
        Ok(ms)
    }

    pub fn integration_ms(&self) -> u32 {
        self.integration_ms
    }

    /// Set how many spectra the instrument averages per scan (at least 1).
    ///
    /// Returns the value actually sent.
    pub fn set_averaging(&mut self, n: u32) -> Result<u32> {
        let n = n.max(1);
        self.channel.set_averaging(n)?;
        self.averaging = n;
        debug!("Averaging set to {}", n);
        Ok(n)
    }

    pub fn averaging(&self) -> u32 {
        self.averaging
    }

    /// Pre-scan delay for the current parameters.
    pub fn settle_delay(&self) -> Option<Duration> {
        settle_delay(self.averaging, self.integration_ms)
    }

    // ------------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------------

    /// Acquire one spectrum using the binary encoding.
    ///
    /// A read timeout mid-frame abandons the whole scan with
    /// [`crate::DriverError::Decode`]. The frame cannot be resumed; call
    /// `scan` again to retry.
    pub fn scan(&mut self) -> Result<Spectrum> {
        self.settle();
        self.channel.enter_binary_mode()?;
        self.channel.begin_scan()?;
        let spectrum = Spectrum::read_from(&mut TransportBytes(self.channel.transport_mut()))?;
        debug!("Binary scan complete: {} samples", spectrum.len());
        Ok(spectrum)
    }

    /// Acquire one spectrum as ASCII lines.
    ///
    /// Fallback path: about seven times slower than [`Spectrometer::scan`].
    /// Size mismatches are logged and the lines returned as received.
    pub fn ascii_scan(&mut self) -> Result<Vec<String>> {
        self.settle();
        self.channel.enter_ascii_mode()?;
        self.channel.begin_scan()?;

        let raw = self
            .channel
            .transport_mut()
            .read_until(&[0], ASCII_READ_LIMIT)?;
        if raw.len() != ASCII_FRAME_LEN {
            warn!(
                "ASCII frame: expected {} bytes, got {}",
                ASCII_FRAME_LEN,
                raw.len()
            );
        }

        // Trailing "\r\n\0".
        let body = &raw[..raw.len().saturating_sub(3)];
        let lines: Vec<String> = String::from_utf8_lossy(body)
            .split("\r\n")
            .map(str::to_owned)
            .collect();
        if lines.len() != PIXEL_COUNT {
            warn!(
                "ASCII frame: expected {} lines, got {}",
                PIXEL_COUNT,
                lines.len()
            );
        }
        Ok(lines)
    }

    fn settle(&self) {
        if let Some(delay) = self.settle_delay() {
            debug!("Waiting {:?} for acquisition to settle", delay);
            thread::sleep(delay);
        }
    }

    // ------------------------------------------------------------------------
    // Link control
    // ------------------------------------------------------------------------

    /// Change the instrument's baud rate.
    ///
    /// The local port follows for 9600, 19200 and 115200. For other codes the
    /// port is left as is and must be retuned through [`Spectrometer::transport_mut`].
    pub fn set_baud(&mut self, code: BaudCode) -> Result<()> {
        self.channel.set_baud(code)?;
        Ok(())
    }

    /// Reset the instrument. Not needed in normal operation.
    pub fn reset(&mut self) -> Result<()> {
        self.channel.reset()?;
        Ok(())
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.channel.transport_mut()
    }

    /// End the session and hand back the transport without closing it.
    pub fn into_transport(self) -> T {
        self.channel.into_inner()
    }

    /// End the session and close the link.
    pub fn close(self) {
        drop(self.channel.into_inner());
        info!("Spectrometer link closed");
    }
}
