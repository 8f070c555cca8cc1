//! Reverse-order release of everything a run acquired.
//!
//! Each resource is pushed right after it is acquired, so the stack always
//! holds exactly what exists. Unwinding pops from the top: services in
//! reverse start order, then the network, which is always at the bottom.

use gantry_common::error::GantryError;
use gantry_runtime::ContainerRuntime;

use crate::network::NetworkScope;
use crate::service::ServiceHandle;

/// Stack of acquired resources.
///
/// A run acquires its network first and services after it, so the network
/// is the bottom of the stack.
#[derive(Debug, Default)]
pub struct TeardownStack {
    network: Option<NetworkScope>,
    services: Vec<ServiceHandle>,
}

/// Outcome of unwinding a [`TeardownStack`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    released: Vec<String>,
    failures: Vec<GantryError>,
}

impl TeardownReport {
    /// Resources released, in the order they were processed
    /// (`container policy-ab12cd34`, `network test-network-ab12cd34`).
    #[must_use]
    pub fn released(&self) -> &[String] {
        &self.released
    }

    /// Failures that occurred while releasing.
    #[must_use]
    pub fn failures(&self) -> &[GantryError] {
        &self.failures
    }

    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, resource: String, failures: Vec<GantryError>) {
        for failure in &failures {
            tracing::warn!(resource = %resource, error = %failure, "teardown step failed");
        }
        self.released.push(resource);
        self.failures.extend(failures);
    }
}

impl TeardownStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len() + usize::from(self.network.is_some())
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes the run's network. Must come before any service.
    pub fn push_network(&mut self, network: NetworkScope) {
        if let Some(previous) = self.network.replace(network) {
            tracing::warn!(network = %previous.name(), "network replaced before teardown");
        }
    }

    /// Pushes a started service and returns it for further setup.
    pub fn push_service(&mut self, service: ServiceHandle) -> &mut ServiceHandle {
        if let Some(network) = self.network.as_mut() {
            network.attach(service.name());
        }
        let top = self.services.len();
        self.services.push(service);
        &mut self.services[top]
    }

    /// The run's network, if acquired.
    #[must_use]
    pub const fn network(&self) -> Option<&NetworkScope> {
        self.network.as_ref()
    }

    /// Started services, in start order.
    #[must_use]
    pub fn services(&self) -> &[ServiceHandle] {
        &self.services
    }

    /// Releases everything, top to bottom.
    ///
    /// Every step runs even when an earlier one fails. Failures are logged
    /// and collected in the report; they are never raised.
    pub async fn unwind(&mut self, runtime: &dyn ContainerRuntime) -> TeardownReport {
        let mut report = TeardownReport::default();

        while let Some(mut service) = self.services.pop() {
            let label = format!("container {}", service.container_name());
            tracing::debug!(service = %service.name(), "terminating service");
            let failures = service.terminate(runtime).await;
            if let Some(network) = self.network.as_mut() {
                network.detach(service.name());
            }
            report.record(label, failures);
        }

        if let Some(network) = self.network.take() {
            let label = format!("network {}", network.name());
            tracing::debug!(network = %network.name(), "removing network");
            let failures = network.remove(runtime).await.err().into_iter().collect();
            report.record(label, failures);
        }

        if report.is_clean() {
            tracing::info!(released = report.released.len(), "teardown complete");
        } else {
            tracing::warn!(
                released = report.released.len(),
                failed = report.failures.len(),
                "teardown finished with failures"
            );
        }
        report
    }
}
