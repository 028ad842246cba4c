use std::net::SocketAddr;
use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

pub const PORT_VAR: &str = "PORT";
pub const DEFAULT_PORT: u16 = 8080;

/// How long in-flight connections get to finish once draining starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT value {value:?}: {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Per-connection bounds against slow or abandoned clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Deadline for a request head, counted from its first byte.
    pub read: Duration,
    /// Longest a write may stall without progress.
    pub write: Duration,
    /// Longest a keep-alive connection may wait for its next request.
    pub idle: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
            idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub limits: ConnectionLimits,
    pub drain_timeout: Duration,
}

impl Config {
    /// Only the port is read from the environment; every other knob is fixed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_port(std::env::var(PORT_VAR).ok().as_deref())
    }

    /// `None` or an empty string selects `DEFAULT_PORT`.
    pub fn with_port(raw: Option<&str>) -> Result<Self, ConfigError> {
        let port = match raw.map(str::trim) {
            None | Some("") => DEFAULT_PORT,
            Some(value) => value.parse().map_err(|source| ConfigError::InvalidPort {
                value: value.to_owned(),
                source,
            })?,
        };

        Ok(Self {
            port,
            limits: ConnectionLimits::default(),
            drain_timeout: DRAIN_TIMEOUT,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
