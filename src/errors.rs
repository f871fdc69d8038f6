use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("cannot open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("link negotiation failed: verification probe returned {received} of 8 bytes")]
    NegotiationFailed { received: usize },
    #[error("binary scan aborted after {decoded} of {expected} samples: read timed out")]
    Decode { decoded: usize, expected: usize },
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
