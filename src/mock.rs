//! Simulated BTC100 for testing without hardware.
//!
//! `MockSpectrometer` implements [`Transport`] and behaves like the instrument
//! at the byte level:
//!
//! - Commands written while host and instrument rates differ are not
//!   understood; the instrument answers with a few garbled bytes.
//! - Recognized commands are echoed as `{cmd}\r\n` followed by `ACK\r\n`.
//! - `K{code}` switches the instrument rate after the reply is queued.
//! - Retuning the host port drops bytes still in flight at the old rate.
//! - `S` streams a frame in the current mode (binary delta encoding or
//!   ASCII lines), preceded by one priming sample.
//!
//! Every write and every host baud change is recorded for assertions.

use std::collections::VecDeque;

use crate::decoder::encode_frame;
use crate::errors::Result;
use crate::protocol::{BaudCode, DEFAULT_AVERAGING, DEFAULT_INTEGRATION_MS, PIXEL_COUNT};
use crate::transport::Transport;

/// Bytes seen by the host when it talks to the instrument at the wrong rate.
pub const GARBLED_REPLY: [u8; 3] = [0xF8, 0x00, 0xFE];

/// Reference value the instrument emits ahead of the first pixel.
pub const PRIMING_SAMPLE: u16 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyMode {
    Ascii,
    Binary,
}

pub struct MockSpectrometer {
    host_baud: u32,
    device_baud: u32,
    silent: bool,
    mode: ReplyMode,
    averaging: u32,
    integration_ms: u32,
    samples: Vec<u16>,
    frame_limit: Option<usize>,
    rx: VecDeque<u8>,
    writes: Vec<String>,
    baud_changes: Vec<u32>,
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpectrometer {
    /// Instrument already running at 115200 with the host port at 115200.
    pub fn new() -> Self {
        Self::at_baud(BaudCode::B115200.rate())
    }

    /// Instrument running at `device_baud` with the host port at 115200.
    pub fn at_baud(device_baud: u32) -> Self {
        Self {
            host_baud: BaudCode::B115200.rate(),
            device_baud,
            silent: false,
            mode: ReplyMode::Ascii,
            averaging: DEFAULT_AVERAGING,
            integration_ms: DEFAULT_INTEGRATION_MS,
            samples: ramp(),
            frame_limit: None,
            rx: VecDeque::new(),
            writes: Vec::new(),
            baud_changes: Vec::new(),
        }
    }

    /// Never reply to anything, as if unplugged.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Pixel values streamed by `S`.
    pub fn with_samples(mut self, samples: Vec<u16>) -> Self {
        self.samples = samples;
        self
    }

    /// Cut every scan frame after `bytes` bytes, as if the link dropped.
    pub fn with_frame_limit(mut self, bytes: usize) -> Self {
        self.frame_limit = Some(bytes);
        self
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub fn baud_changes(&self) -> &[u32] {
        &self.baud_changes
    }

    pub fn device_baud(&self) -> u32 {
        self.device_baud
    }

    /// Averaging count last accepted by the instrument.
    pub fn averaging(&self) -> u32 {
        self.averaging
    }

    /// Integration time last accepted by the instrument.
    pub fn integration_ms(&self) -> u32 {
        self.integration_ms
    }

    /// Bytes queued but not yet read by the host.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn reply(&mut self, text: &str) {
        self.rx.extend(text.as_bytes());
        self.rx.extend(b"\r\n");
    }

    fn acknowledge(&mut self, cmd: &str) {
        self.reply(cmd);
        self.reply("ACK");
    }

    fn handle(&mut self, cmd: &str) {
        let mut chars = cmd.chars();
        let keyword = chars.next();
        let arg = chars.as_str();
        match keyword {
            Some('a') => {
                self.mode = ReplyMode::Ascii;
                self.acknowledge(cmd);
            }
            Some('b') => {
                self.mode = ReplyMode::Binary;
                self.acknowledge(cmd);
            }
            Some('A') => {
                if let Ok(n) = arg.parse() {
                    self.averaging = n;
                }
                self.acknowledge(cmd);
            }
            Some('I') => {
                if let Ok(ms) = arg.parse() {
                    self.integration_ms = ms;
                }
                self.acknowledge(cmd);
            }
            Some('K') => {
                self.acknowledge(cmd);
                if let Some(code) = arg.parse().ok().and_then(|c| BaudCode::from_code(c).ok()) {
                    self.device_baud = code.rate();
                }
            }
            Some('Q') => self.acknowledge(cmd),
            Some('S') => {
                self.acknowledge(cmd);
                let frame = self.frame();
                let frame = match self.frame_limit {
                    Some(limit) => &frame[..limit.min(frame.len())],
                    None => &frame[..],
                };
                self.rx.extend(frame);
            }
            _ => self.reply("?"),
        }
    }

    fn frame(&self) -> Vec<u8> {
        match self.mode {
            ReplyMode::Binary => {
                let mut values = Vec::with_capacity(self.samples.len() + 1);
                values.push(PRIMING_SAMPLE);
                values.extend_from_slice(&self.samples);
                encode_frame(&values)
            }
            ReplyMode::Ascii => {
                let mut text = String::with_capacity(self.samples.len() * 7 + 1);
                for v in &self.samples {
                    text.push_str(&format!("{v:05}\r\n"));
                }
                let mut bytes = text.into_bytes();
                bytes.push(0);
                bytes
            }
        }
    }
}

impl Transport for MockSpectrometer {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(buf);
        self.writes.push(text.trim_end().to_string());
        if self.silent {
            return Ok(());
        }
        if self.host_baud != self.device_baud {
            self.rx.extend(GARBLED_REPLY);
            return Ok(());
        }
        for line in text.lines().filter(|l| !l.is_empty()) {
            self.handle(line);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.host_baud = baud;
        self.baud_changes.push(baud);
        self.rx.clear();
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.host_baud
    }
}

/// Default pixel values: a slow ramp with a few jumps that need escapes.
fn ramp() -> Vec<u16> {
    (0..PIXEL_COUNT)
        .map(|i| {
            let base = 2_000 + (i as u16 % 256) * 3;
            if i % 512 == 100 {
                base + 5_000
            } else {
                base
            }
        })
        .collect()
}
