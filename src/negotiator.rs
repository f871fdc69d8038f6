//! Link negotiation.
//!
//! The BTC100 powers up at 9600 baud but may have been left at 115200 by an
//! earlier session, and it never reports its current rate. The only usable
//! signal is whether the eight-byte reply to `a` arrives intact at the rate
//! we assume.
//!
//! ```text
//! Unopened -> ProbeHigh -> Verified
//!                 |
//!                 v
//!            RecoverLow -> Retune -> Verified | Failed
//! ```
//!
//! `RecoverLow` drops the port to 9600 and sends one throwaway `a` to flush
//! the instrument's receiver of the garbage it got at the wrong rate. Only
//! then is `K0` legible. The instrument switches to 115200 as soon as it has
//! sent its reply, so the port is retuned right after and probed once more.

use log::{debug, info, warn};

use crate::command::CommandChannel;
use crate::config::LinkConfig;
use crate::errors::{DriverError, Result};
use crate::protocol::{BaudCode, MODE_REPLY_LEN};
use crate::transport::{SerialTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No port open yet.
    Unopened,
    /// Port open at the target rate; probing.
    ProbeHigh,
    /// Probe failed; falling back to the recovery rate.
    RecoverLow,
    /// Asking the instrument to move to the target rate, then re-probing.
    Retune,
    Verified,
    Failed,
}

impl LinkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Verified | LinkState::Failed)
    }
}

/// Drives a freshly opened link to a verified state.
pub struct Negotiator<T: Transport> {
    channel: CommandChannel<T>,
    state: LinkState,
    history: Vec<LinkState>,
    target: BaudCode,
    recovery: BaudCode,
    last_received: usize,
}

impl Negotiator<SerialTransport> {
    /// Open the configured port at the target rate.
    ///
    /// An open failure is final for this attempt and is not retried.
    pub fn open(config: &LinkConfig) -> Result<Self> {
        info!("Opening {} at {}", config.port, config.target_baud);
        let transport = SerialTransport::open(
            &config.port,
            config.target_baud.rate(),
            config.read_timeout(),
        )
        .inspect_err(|e| warn!("Link failed before negotiation: {e}"))?;
        Ok(Self::new(transport).with_bauds(config.target_baud, config.recovery_baud))
    }
}

impl<T: Transport> Negotiator<T> {
    /// Start negotiating over an already opened transport.
    ///
    /// The first step puts the transport at the target rate if it is not
    /// there already.
    pub fn new(transport: T) -> Self {
        Self {
            channel: CommandChannel::new(transport),
            state: LinkState::Unopened,
            history: vec![LinkState::Unopened],
            target: BaudCode::B115200,
            recovery: BaudCode::B9600,
            last_received: 0,
        }
    }

    pub fn with_bauds(mut self, target: BaudCode, recovery: BaudCode) -> Self {
        self.target = target;
        self.recovery = recovery;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[LinkState] {
        &self.history
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    /// Perform the work of the current state and move to the next one.
    ///
    /// Terminal states are left unchanged.
    pub fn step(&mut self) -> Result<LinkState> {
        let next = match self.state {
            LinkState::Unopened => {
                let transport = self.channel.transport_mut();
                if transport.baud_rate() != self.target.rate() {
                    debug!(
                        "Port at {} baud; moving to {}",
                        transport.baud_rate(),
                        self.target
                    );
                    transport.set_baud_rate(self.target.rate())?;
                }
                LinkState::ProbeHigh
            }
            LinkState::ProbeHigh => {
                let received = self.channel.probe()?;
                if received == MODE_REPLY_LEN {
                    info!("Instrument answered at {}", self.target);
                    LinkState::Verified
                } else {
                    info!(
                        "Probe at {} returned {} bytes; assuming {}",
                        self.target, received, self.recovery
                    );
                    LinkState::RecoverLow
                }
            }
            LinkState::RecoverLow => {
                self.channel
                    .transport_mut()
                    .set_baud_rate(self.recovery.rate())?;
                // Expected to come back short; it only resynchronizes the
                // instrument's receiver.
                let primed = self.channel.probe()?;
                debug!("Priming probe at {} returned {} bytes", self.recovery, primed);
                LinkState::Retune
            }
            LinkState::Retune => {
                let reply = self.channel.request_baud(self.target)?;
                debug!("Baud change reply: {} bytes", reply.len());
                self.channel
                    .transport_mut()
                    .set_baud_rate(self.target.rate())?;
                self.last_received = self.channel.probe()?;
                if self.last_received == MODE_REPLY_LEN {
                    info!("Instrument moved to {}", self.target);
                    LinkState::Verified
                } else {
                    warn!(
                        "No valid reply after retune to {} ({} bytes)",
                        self.target, self.last_received
                    );
                    LinkState::Failed
                }
            }
            LinkState::Verified | LinkState::Failed => return Ok(self.state),
        };
        self.state = next;
        self.history.push(next);
        Ok(next)
    }

    /// Step to a terminal state and hand back the verified channel.
    pub fn run(mut self) -> Result<CommandChannel<T>> {
        loop {
            match self.step()? {
                LinkState::Verified => return Ok(self.channel),
                LinkState::Failed => {
                    return Err(DriverError::NegotiationFailed {
                        received: self.last_received,
                    })
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSpectrometer;

    #[test]
    fn already_at_target_rate() {
        let mut neg = Negotiator::new(MockSpectrometer::new());
        assert_eq!(neg.state(), LinkState::Unopened);
        assert_eq!(neg.step().unwrap(), LinkState::ProbeHigh);
        assert!(neg.transport().writes().is_empty());
        assert_eq!(neg.step().unwrap(), LinkState::Verified);
        assert_eq!(
            neg.history(),
            [LinkState::Unopened, LinkState::ProbeHigh, LinkState::Verified]
        );
        assert!(neg.transport().baud_changes().is_empty());
        assert_eq!(neg.transport().baud_rate(), 115_200);
        assert_eq!(neg.transport().writes(), ["a"]);
    }

    #[test]
    fn recovers_from_power_on_rate() {
        let mut neg = Negotiator::new(MockSpectrometer::at_baud(9_600));
        assert_eq!(neg.step().unwrap(), LinkState::ProbeHigh);
        assert_eq!(neg.step().unwrap(), LinkState::RecoverLow);
        assert_eq!(neg.step().unwrap(), LinkState::Retune);
        assert_eq!(neg.transport().baud_rate(), 9_600);
        assert_eq!(neg.step().unwrap(), LinkState::Verified);

        let mock = neg.transport();
        assert_eq!(mock.baud_changes(), [9_600, 115_200]);
        assert_eq!(mock.writes(), ["a", "a", "K0", "a"]);
        assert_eq!(mock.device_baud(), 115_200);
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut neg = Negotiator::new(MockSpectrometer::new());
        while !neg.step().unwrap().is_terminal() {}
        let len = neg.history().len();
        assert_eq!(neg.step().unwrap(), LinkState::Verified);
        assert_eq!(neg.history().len(), len);
        assert!(neg.state().is_terminal());
    }

    #[test]
    fn silent_instrument_fails_negotiation() {
        let neg = Negotiator::new(MockSpectrometer::new().silent());
        match neg.run() {
            Err(DriverError::NegotiationFailed { received }) => assert_eq!(received, 0),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("negotiation should fail"),
        }
    }

    #[test]
    fn unknown_rate_fails_after_recovery() {
        // Neither 115200 nor 9600: both probes and the baud change are garbled.
        let mut neg = Negotiator::new(MockSpectrometer::at_baud(38_400));
        while !neg.step().unwrap().is_terminal() {}
        assert_eq!(neg.state(), LinkState::Failed);
        assert_eq!(
            neg.history(),
            [
                LinkState::Unopened,
                LinkState::ProbeHigh,
                LinkState::RecoverLow,
                LinkState::Retune,
                LinkState::Failed
            ]
        );
    }

    #[test]
    fn first_step_moves_port_to_target_rate() {
        let mut transport = MockSpectrometer::new();
        transport.set_baud_rate(9_600).unwrap();
        let mut neg = Negotiator::new(transport);
        assert_eq!(neg.step().unwrap(), LinkState::ProbeHigh);
        assert_eq!(neg.transport().baud_rate(), 115_200);
        assert_eq!(neg.transport().baud_changes(), [9_600, 115_200]);
        assert_eq!(neg.step().unwrap(), LinkState::Verified);
    }

    #[test]
    fn missing_port_is_an_open_error() {
        let config = LinkConfig::new("/dev/btc100-missing-port");
        match Negotiator::open(&config) {
            Err(DriverError::Open { port, .. }) => assert_eq!(port, "/dev/btc100-missing-port"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[test]
    fn run_returns_usable_channel() {
        let mut channel = Negotiator::new(MockSpectrometer::at_baud(9_600)).run().unwrap();
        assert_eq!(channel.set_averaging(4).unwrap(), b"A4\r\nACK\r\n");
    }
}
