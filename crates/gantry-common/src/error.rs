//! Unified error types for the gantry workspace.
//!
//! Runtime backends report raw failures as [`GantryError::Runtime`]. The
//! orchestrator classifies them by the phase they interrupted before they
//! reach the caller, so every fatal error names where startup stopped.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum GantryError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or plan entry is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The container runtime rejected or failed an operation.
    #[error("runtime operation {operation} failed for {target}: {reason}")]
    Runtime {
        /// Runtime primitive that failed (e.g. `start_container`).
        operation: &'static str,
        /// Network, container or image the operation targeted.
        target: String,
        /// Message reported by the runtime.
        reason: String,
    },

    /// Network creation, container start, or log attachment failed.
    #[error("startup failed while {phase}: {source}")]
    Startup {
        /// Orchestration phase that was interrupted.
        phase: String,
        /// Underlying failure.
        source: Box<GantryError>,
    },

    /// A declared readiness marker never appeared in the log stream.
    #[error("service {service} not ready after {timeout:?}: marker \"{marker}\" never logged")]
    ReadinessTimeout {
        /// Service whose gate timed out.
        service: String,
        /// Marker the gate was waiting for.
        marker: String,
        /// Budget that elapsed.
        timeout: Duration,
    },

    /// The runtime could not report a reachable address for a service.
    #[error("cannot resolve endpoint of {service} on port {port}: {reason}")]
    EndpointResolution {
        /// Service whose endpoint was requested.
        service: String,
        /// Container port that was looked up.
        port: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Releasing a resource during cleanup failed.
    #[error("teardown of {resource} failed: {reason}")]
    Teardown {
        /// Resource being released (`container policy`, `network test-network-ab12`).
        resource: String,
        /// Why the release failed.
        reason: String,
    },
}

/// Coarse classification of a [`GantryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network creation, container start, or log attachment failed.
    Startup,
    /// A readiness marker never appeared.
    ReadinessTimeout,
    /// An endpoint could not be resolved.
    EndpointResolution,
    /// Cleanup of an acquired resource failed.
    Teardown,
    /// The plan or settings are invalid, or something referenced is missing.
    Config,
    /// Local filesystem access failed.
    Io,
}

impl GantryError {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Config { .. } | Self::NotFound { .. } => ErrorKind::Config,
            Self::Runtime { .. } | Self::Startup { .. } => ErrorKind::Startup,
            Self::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            Self::EndpointResolution { .. } => ErrorKind::EndpointResolution,
            Self::Teardown { .. } => ErrorKind::Teardown,
        }
    }

    /// Whether this error aborts the run.
    ///
    /// Teardown failures are logged and collected; everything else stops
    /// orchestration.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Teardown { .. })
    }

    /// Wraps a failure as a startup failure in the given phase.
    #[must_use]
    pub fn startup(phase: impl Into<String>, source: Self) -> Self {
        Self::Startup {
            phase: phase.into(),
            source: Box::new(source),
        }
    }

    /// Builds a runtime failure from any displayable error.
    #[must_use]
    pub fn runtime(
        operation: &'static str,
        target: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Runtime {
            operation,
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GantryError>;
