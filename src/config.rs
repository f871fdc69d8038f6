//! Link configuration.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{BaudCode, DEFAULT_TIMEOUT};

/// Serial device used when nothing else is configured.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Environment variable naming the serial device.
pub const PORT_ENV: &str = "BTC100_PORT";

/// Environment variable overriding the read timeout, in milliseconds.
pub const TIMEOUT_ENV: &str = "BTC100_TIMEOUT_MS";

/// How to reach the instrument and which rates to negotiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path (e.g. `/dev/ttyUSB0`).
    pub port: String,
    /// Per-read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Rate the link is brought to and kept at.
    pub target_baud: BaudCode,
    /// Rate assumed when the first probe fails (the instrument's power-on rate).
    pub recovery_baud: BaudCode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            read_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            target_baud: BaudCode::B115200,
            recovery_baud: BaudCode::B9600,
        }
    }
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Defaults overridden by `BTC100_PORT` and `BTC100_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(port) = lookup(PORT_ENV) {
            config.port = port;
        }
        if let Some(ms) = lookup(TIMEOUT_ENV) {
            config.read_timeout_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("{TIMEOUT_ENV}={ms:?} is not a millisecond count"))?;
        }
        Ok(config)
    }
}
