//! Domain primitive types used across the gantry workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GantryError;

/// Identifier the container runtime assigned to a started container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random suffix shared by every resource created in one run.
///
/// Parallel runs on the same daemon never collide on network or
/// container names because each draws its own suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunSuffix(String);

impl RunSuffix {
    /// Draws a fresh suffix of [`RUN_SUFFIX_LEN`](crate::constants::RUN_SUFFIX_LEN)
    /// lowercase hex characters.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = uuid::Uuid::new_v4().simple().to_string();
        raw.truncate(crate::constants::RUN_SUFFIX_LEN);
        Self(raw)
    }

    /// Uses a caller-chosen suffix.
    #[must_use]
    pub fn fixed(suffix: impl Into<String>) -> Self {
        Self(suffix.into())
    }

    /// Appends the suffix to a base name: `policy` becomes `policy-1a2b3c4d`.
    #[must_use]
    pub fn apply(&self, base: &str) -> String {
        format!("{base}-{}", self.0)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP (the default when a port is written without a protocol).
    Tcp,
    /// UDP.
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A container port exposed to the host, written `8080/tcp` or `8080`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExposedPort {
    /// Port number inside the container.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl ExposedPort {
    /// A TCP port.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }
}

impl fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl FromStr for ExposedPort {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GantryError::Config {
            message: format!("invalid port \"{s}\": expected <port> or <port>/<tcp|udp>"),
        };
        let (number, protocol) = match s.trim().split_once('/') {
            Some((n, "tcp")) => (n, Protocol::Tcp),
            Some((n, "udp")) => (n, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s.trim(), Protocol::Tcp),
        };
        let port = number.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(Self { port, protocol })
    }
}

impl TryFrom<String> for ExposedPort {
    type Error = GantryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExposedPort> for String {
    fn from(port: ExposedPort) -> Self {
        port.to_string()
    }
}
