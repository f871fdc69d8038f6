//! Command/response exchange over a [`Transport`].
//!
//! Every exchange writes one command and then reads a reply bounded both by a
//! byte count and by the transport timeout, so nothing here blocks forever.

use log::{debug, warn};

use crate::errors::Result;
use crate::protocol::{
    BaudCode, Command, Handshake, ACK_LEN, CRLF, ECHO_LEN, MODE_LINE_LIMIT, MODE_REPLY_LEN,
};
use crate::transport::Transport;

/// Exclusive owner of the link while commands are exchanged.
pub struct CommandChannel<T: Transport> {
    transport: T,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write the encoded command.
    pub fn send(&mut self, cmd: Command) -> Result<()> {
        debug!("-> {}", cmd);
        self.transport.write_all(cmd.encode().as_bytes())
    }

    /// Send `cmd` and read its echo line plus acknowledgment line within
    /// `cmd.reply_limit()` bytes.
    pub fn exchange(&mut self, cmd: Command) -> Result<Vec<u8>> {
        self.send(cmd)?;
        let reply = self.read_reply(cmd.reply_limit())?;
        debug!("<- {:?} ({} bytes)", String::from_utf8_lossy(&reply), reply.len());
        Ok(reply)
    }

    /// Read up to two CRLF-terminated lines (echo, then ACK) without
    /// exceeding `limit` bytes in total.
    fn read_reply(&mut self, limit: usize) -> Result<Vec<u8>> {
        let mut reply = self.transport.read_until(CRLF, limit)?;
        if reply.ends_with(CRLF) && reply.len() < limit {
            let ack = self.transport.read_until(CRLF, limit - reply.len())?;
            reply.extend_from_slice(&ack);
        }
        Ok(reply)
    }

    /// Send `a` and report how many of the eight reply bytes arrived.
    ///
    /// Used while the link rate is still unknown: a complete reply is the only
    /// sign that both ends agree on the baud rate.
    pub fn probe(&mut self) -> Result<usize> {
        self.send(Command::AsciiMode)?;
        let reply = self.transport.read_up_to(MODE_REPLY_LEN)?;
        debug!("probe at {} baud: {} bytes", self.transport.baud_rate(), reply.len());
        Ok(reply.len())
    }

    pub fn set_averaging(&mut self, n: u32) -> Result<Vec<u8>> {
        self.exchange(Command::SetAveraging(n))
    }

    pub fn set_integration(&mut self, ms: u32) -> Result<Vec<u8>> {
        self.exchange(Command::SetIntegration(ms))
    }

    /// Ask the instrument to switch rate, without touching the local port.
    ///
    /// The reply is often cut short because the instrument changes rate as
    /// soon as it finishes transmitting.
    pub fn request_baud(&mut self, code: BaudCode) -> Result<Vec<u8>> {
        self.exchange(Command::SetBaud(code))
    }

    /// Switch the instrument rate and follow it locally when the code is one
    /// the driver tracks (9600, 19200, 115200).
    pub fn set_baud(&mut self, code: BaudCode) -> Result<Vec<u8>> {
        let reply = self.request_baud(code)?;
        match code.local_retune() {
            Some(rate) => self.transport.set_baud_rate(rate)?,
            None => warn!(
                "Instrument switched to {}; local port left at {} baud",
                code,
                self.transport.baud_rate()
            ),
        }
        Ok(reply)
    }

    /// Switch replies to ASCII. Reads `a\r\n` then `ACK\r\n`.
    pub fn enter_ascii_mode(&mut self) -> Result<Handshake> {
        self.send(Command::AsciiMode)?;
        let echo = self.transport.read_until(CRLF, MODE_LINE_LIMIT)?;
        if echo.len() != ECHO_LEN {
            warn!("ASCII mode echo: expected {} bytes, got {}", ECHO_LEN, echo.len());
        }
        let ack = self.transport.read_until(CRLF, MODE_LINE_LIMIT)?;
        if ack.len() != ACK_LEN {
            warn!("ASCII mode ACK: expected {} bytes, got {}", ACK_LEN, ack.len());
        }
        Ok(Handshake { echo, ack })
    }

    /// Switch replies to the binary delta encoding. Reads eight bytes.
    pub fn enter_binary_mode(&mut self) -> Result<Handshake> {
        self.send(Command::BinaryMode)?;
        let reply = self.transport.read_up_to(MODE_REPLY_LEN)?;
        if reply.len() != MODE_REPLY_LEN {
            warn!(
                "Binary mode reply: expected {} bytes, got {}",
                MODE_REPLY_LEN,
                reply.len()
            );
        }
        Ok(Handshake::from_reply(reply))
    }

    /// Send `S` and discard the echo and ACK. The frame follows directly.
    pub fn begin_scan(&mut self) -> Result<Handshake> {
        self.send(Command::Scan)?;
        let echo = self.transport.read_up_to(ECHO_LEN)?;
        let ack = self.transport.read_up_to(ACK_LEN)?;
        Ok(Handshake { echo, ack })
    }

    pub fn reset(&mut self) -> Result<Vec<u8>> {
        self.exchange(Command::Reset)
    }
}
