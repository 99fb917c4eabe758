//! Live robot connection: wire codec, transport and connection lifecycle.
//!
//! # Responsibility
//! - Keep one logical connection to a robot endpoint alive.
//! - Publish decoded telemetry and video frames as replace-on-update values.
//! - Send fire-and-forget commands while connected.
//!
//! # Invariants
//! - Only `connection::ConnectionManager` writes `ConnectionState`.
//! - A malformed inbound frame never changes state or published values.

pub mod codec;
pub mod connection;
pub mod transport;

use crate::config::DEFAULT_ROBOT_PORT;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type LinkResult<T> = Result<T, LinkError>;

/// Transport-level failure. Surfaces as an `Errored` state transition.
#[derive(Debug)]
pub enum LinkError {
    InvalidEndpoint(String),
    Connect(String),
    Timeout,
}

impl Display for LinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEndpoint(value) => write!(f, "invalid robot endpoint: {value}"),
            Self::Connect(message) => write!(f, "robot connection failed: {message}"),
            Self::Timeout => write!(f, "robot connection timed out"),
        }
    }
}

impl Error for LinkError {}

/// Robot address; the live connection runs over `ws://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host` or `host:port`; the port defaults to 8765.
    pub fn parse(raw: &str) -> LinkResult<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("ws://").unwrap_or(trimmed);
        let (host, port) = match trimmed.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| LinkError::InvalidEndpoint(raw.to_string()))?;
                (host, port)
            }
            None => (trimmed, DEFAULT_ROBOT_PORT),
        };
        if host.is_empty() || host.contains(['/', ' ']) {
            return Err(LinkError::InvalidEndpoint(raw.to_string()));
        }
        Ok(Self::new(host, port))
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
