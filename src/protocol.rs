//! BTC100 wire protocol: commands, baud codes and reply shapes.
//!
//! Every command is a single ASCII keyword, optionally followed by a decimal
//! argument, terminated by `\n`. The instrument echoes the command back as a
//! `\r\n`-terminated line and then acknowledges with `ACK\r\n`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Number of physical pixels, and therefore samples, in one spectrum.
pub const PIXEL_COUNT: usize = 2048;

/// Byte flagging that the next two bytes carry an absolute big-endian sample.
pub const ESCAPE: u8 = 0x80;

/// Line terminator used by every instrument reply.
pub const CRLF: &[u8] = b"\r\n";

/// Read timeout applied to the serial port for every read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Length of the echo line sent back for a one-letter command (`a\r\n`).
pub const ECHO_LEN: usize = 3;

/// Length of the acknowledgment line (`ACK\r\n`).
pub const ACK_LEN: usize = 5;

/// Full reply to a mode command: echo followed by acknowledgment.
pub const MODE_REPLY_LEN: usize = ECHO_LEN + ACK_LEN;

/// Per-line bound when reading the ASCII mode handshake.
pub const MODE_LINE_LIMIT: usize = 8;

/// Reply bound for the baud-change command.
pub const BAUD_REPLY_LIMIT: usize = 9;

/// Reply bound for the reset command.
pub const RESET_REPLY_LIMIT: usize = 8;

/// Expected size of an ASCII frame: 2048 lines of `NNNNN\r\n` plus a NUL.
pub const ASCII_FRAME_LEN: usize = PIXEL_COUNT * 7 + 1;

/// Upper bound when reading an ASCII frame.
pub const ASCII_READ_LIMIT: usize = 16_000;

/// Integration time range accepted by the instrument, in milliseconds.
pub const MIN_INTEGRATION_MS: u32 = 50;
pub const MAX_INTEGRATION_MS: u32 = 65_000;

pub const DEFAULT_AVERAGING: u32 = 1;
pub const DEFAULT_INTEGRATION_MS: u32 = MIN_INTEGRATION_MS;

// ============================================================================
// Baud codes
// ============================================================================

/// Argument of the `K` command selecting the instrument's serial bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BaudCode {
    #[default]
    B115200 = 0,
    B38400 = 1,
    B19200 = 2,
    /// Power-on rate of the instrument.
    B9600 = 3,
    B4800 = 4,
    B2400 = 5,
    B1200 = 6,
    B600 = 7,
}

impl BaudCode {
    pub const ALL: [BaudCode; 8] = [
        BaudCode::B115200,
        BaudCode::B38400,
        BaudCode::B19200,
        BaudCode::B9600,
        BaudCode::B4800,
        BaudCode::B2400,
        BaudCode::B1200,
        BaudCode::B600,
    ];

    /// Code sent as the `K` argument.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Bit rate selected by this code.
    pub fn rate(self) -> u32 {
        match self {
            BaudCode::B115200 => 115_200,
            BaudCode::B38400 => 38_400,
            BaudCode::B19200 => 19_200,
            BaudCode::B9600 => 9_600,
            BaudCode::B4800 => 4_800,
            BaudCode::B2400 => 2_400,
            BaudCode::B1200 => 1_200,
            BaudCode::B600 => 600,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or_else(|| DriverError::Protocol(format!("invalid baud code {code} (expected 0-7)")))
    }

    pub fn from_rate(rate: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.rate() == rate)
    }

    /// Host-side rate to switch to after sending this code, if the driver
    /// follows the instrument automatically.
    ///
    /// Only 9600, 19200 and 115200 are tracked; other codes are sent but the
    /// caller must retune the port itself.
    pub fn local_retune(self) -> Option<u32> {
        match self {
            BaudCode::B115200 | BaudCode::B19200 | BaudCode::B9600 => Some(self.rate()),
            _ => None,
        }
    }
}

impl fmt::Display for BaudCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} baud", self.rate())
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `a`: reply in ASCII.
    AsciiMode,
    /// `b`: reply in the binary delta encoding.
    BinaryMode,
    /// `K{code}`: change the serial bit rate.
    SetBaud(BaudCode),
    /// `A{n}`: number of spectra to average.
    SetAveraging(u32),
    /// `I{ms}`: integration time.
    SetIntegration(u32),
    /// `S`: acquire and send one spectrum.
    Scan,
    /// `Q`: reset the instrument.
    Reset,
}

impl Command {
    /// Command text including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Command::AsciiMode => "a\n".to_string(),
            Command::BinaryMode => "b\n".to_string(),
            Command::SetBaud(code) => format!("K{}\n", code.code()),
            Command::SetAveraging(n) => format!("A{n}\n"),
            Command::SetIntegration(ms) => format!("I{ms}\n"),
            Command::Scan => "S\n".to_string(),
            Command::Reset => "Q\n".to_string(),
        }
    }

    /// Maximum number of reply bytes to wait for.
    ///
    /// Parameter commands echo `{cmd}\r\n` and acknowledge with `ACK\r\n`,
    /// which is the encoded length plus six.
    pub fn reply_limit(&self) -> usize {
        match self {
            Command::AsciiMode | Command::BinaryMode | Command::Scan => MODE_REPLY_LEN,
            Command::SetBaud(_) => BAUD_REPLY_LIMIT,
            Command::SetAveraging(_) | Command::SetIntegration(_) => self.encode().len() + 6,
            Command::Reset => RESET_REPLY_LIMIT,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode().trim_end())
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Echo and acknowledgment read back after a mode or scan command.
///
/// A short handshake is not an error: the instrument often still acted on the
/// command, which later steps reveal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub echo: Vec<u8>,
    pub ack: Vec<u8>,
}

impl Handshake {
    /// Split a single contiguous reply into echo and acknowledgment.
    pub fn from_reply(mut reply: Vec<u8>) -> Self {
        let ack = reply.split_off(reply.len().min(ECHO_LEN));
        Self { echo: reply, ack }
    }

    pub fn len(&self) -> usize {
        self.echo.len() + self.ack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.echo.len() == ECHO_LEN && self.ack.len() == ACK_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_codes_match_instrument_table() {
        let rates: Vec<u32> = BaudCode::ALL.iter().map(|b| b.rate()).collect();
        assert_eq!(
            rates,
            vec![115_200, 38_400, 19_200, 9_600, 4_800, 2_400, 1_200, 600]
        );
        for (i, code) in BaudCode::ALL.iter().enumerate() {
            assert_eq!(usize::from(code.code()), i);
            assert_eq!(BaudCode::from_code(code.code()).unwrap(), *code);
        }
        assert!(BaudCode::from_code(8).is_err());
        assert_eq!(BaudCode::from_rate(9_600), Some(BaudCode::B9600));
        assert_eq!(BaudCode::from_rate(57_600), None);
    }

    #[test]
    fn only_three_codes_retune_locally() {
        let retuned: Vec<BaudCode> = BaudCode::ALL
            .into_iter()
            .filter(|b| b.local_retune().is_some())
            .collect();
        assert_eq!(
            retuned,
            vec![BaudCode::B115200, BaudCode::B19200, BaudCode::B9600]
        );
    }

    #[test]
    fn command_text_and_reply_limits() {
        assert_eq!(Command::AsciiMode.encode(), "a\n");
        assert_eq!(Command::SetBaud(BaudCode::B115200).encode(), "K0\n");
        assert_eq!(Command::SetAveraging(1).encode(), "A1\n");
        assert_eq!(Command::SetAveraging(1).reply_limit(), 9);
        assert_eq!(Command::SetIntegration(50).reply_limit(), 10);
        assert_eq!(Command::SetIntegration(65_000).reply_limit(), 13);
        assert_eq!(Command::SetBaud(BaudCode::B9600).reply_limit(), 9);
        assert_eq!(Command::Reset.reply_limit(), 8);
        assert_eq!(Command::Scan.to_string(), "S");
    }

    #[test]
    fn handshake_split() {
        let hs = Handshake::from_reply(b"b\r\nACK\r\n".to_vec());
        assert_eq!(hs.echo, b"b\r\n");
        assert_eq!(hs.ack, b"ACK\r\n");
        assert!(hs.is_complete());

        let short = Handshake::from_reply(b"b\r".to_vec());
        assert_eq!(short.len(), 2);
        assert!(short.ack.is_empty());
        assert!(!short.is_complete());
    }

    #[test]
    fn ascii_frame_size() {
        assert_eq!(ASCII_FRAME_LEN, 14_337);
    }
}
