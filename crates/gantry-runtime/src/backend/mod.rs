//! Container runtime abstraction.

pub mod docker;
pub mod scripted;

use std::collections::BTreeMap;

use async_trait::async_trait;
use gantry_common::error::Result;
use gantry_common::types::{ContainerId, ExposedPort};

use crate::logs::LogStream;

/// Everything the runtime needs to start one service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Unique container name (already carries the run suffix).
    pub name: String,
    /// Fully resolved image reference.
    pub image: String,
    /// Hostname other services on the network use to reach this one.
    pub hostname: Option<String>,
    /// Container ports to publish on the host.
    pub exposed_ports: Vec<ExposedPort>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Network the container joins.
    pub network: String,
    /// Pull the image before creating the container.
    pub auto_pull: bool,
}

/// A network created by the runtime for one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle {
    /// Network name, unique per run.
    pub name: String,
}

/// Primitives the harness needs from a container engine.
///
/// Implementors must make `start_container` all-or-nothing: when it
/// returns an error, no container is left behind for the caller to clean up.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a network with the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created.
    async fn create_network(&self, name: &str) -> Result<NetworkHandle>;

    /// Removes a network created by [`create_network`](Self::create_network).
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be removed.
    async fn remove_network(&self, network: &NetworkHandle) -> Result<()>;

    /// Creates and starts a container, returning its runtime identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be pulled or the container
    /// cannot be created or started.
    async fn start_container(&self, request: &ContainerRequest) -> Result<ContainerId>;

    /// Stops and removes a container. A container that is already gone
    /// counts as terminated.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime refuses to remove the container.
    async fn terminate_container(&self, id: &ContainerId) -> Result<()>;

    /// Returns the host-reachable URL of a published container port,
    /// e.g. `http://localhost:49154`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not published or the container
    /// cannot be inspected.
    async fn resolve_endpoint(
        &self,
        id: &ContainerId,
        port: ExposedPort,
        scheme: &str,
    ) -> Result<String>;

    /// Follows the container's combined stdout and stderr, one item per line.
    ///
    /// The stream ends when the container exits. Dropping it detaches
    /// from the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the log stream cannot be attached.
    async fn stream_logs(&self, id: &ContainerId) -> Result<LogStream>;
}
