//! Driver for the B&W Tek BTC100 serial spectrometer.
//!
//! The instrument speaks a small ASCII command set over a serial line and
//! returns 2048-pixel spectra either as text or in a compact binary delta
//! encoding. This crate handles the two awkward parts of talking to it:
//!
//! - **Link negotiation.** The power-on rate is 9600 baud but a previous
//!   session may have left the instrument at 115200, and there is no status
//!   query. [`Negotiator`] probes, recovers and retunes until an intact reply
//!   proves both ends agree.
//! - **Binary scans.** The binary stream carries no end marker. The
//!   [`decoder`] pulls bytes until it has counted out a full spectrum, so a
//!   scan costs no trailing timeout.
//!
//! # Usage
//!
//! ```ignore
//! use btc100::{LinkConfig, Spectrometer};
//!
//! btc100::init_rust_logging();
//! let mut spec = Spectrometer::connect(&LinkConfig::from_env()?)?;
//! spec.set_averaging(4)?;
//! spec.set_integration(500)?;
//! let spectrum = spec.scan()?;
//! assert_eq!(spectrum.len(), btc100::PIXEL_COUNT);
//! spec.close();
//! ```
//!
//! # Timing
//!
//! Everything is blocking and single threaded. Each read waits at most the
//! configured timeout (2 s by default); before each scan the session sleeps
//! for a settle delay proportional to averaging × integration time so the
//! first reads do not time out while the instrument is still acquiring.

pub mod command;
pub mod config;
pub mod decoder;
mod errors;
mod logging;
pub mod mock;
pub mod negotiator;
pub mod protocol;
pub mod spectrometer;
pub mod transport;

pub use command::CommandChannel;
pub use config::LinkConfig;
pub use decoder::{decode_frame, encode_frame, ByteSource, DeltaDecoder, Spectrum};
pub use errors::*;
pub use logging::{init_logging_str, init_rust_logging};
pub use negotiator::{LinkState, Negotiator};
pub use protocol::{BaudCode, Command, Handshake, PIXEL_COUNT};
pub use spectrometer::{settle_delay, Spectrometer};
pub use transport::{SerialTransport, Transport};
