//! Service definitions and the handles of started services.

use std::collections::BTreeMap;
use std::sync::Arc;

use gantry_common::constants::DEFAULT_SCHEME;
use gantry_common::error::{GantryError, Result};
use gantry_common::types::{ContainerId, ExposedPort};
use gantry_runtime::{ContainerRequest, ContainerRuntime, LogStream};

use crate::readiness::{LogFollower, ReadinessGate};

/// Declarative description of one service to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    name: String,
    image: String,
    hostname: Option<String>,
    ports: Vec<ExposedPort>,
    env: BTreeMap<String, String>,
    ready_marker: String,
    depends_on: Vec<String>,
    endpoint_port: Option<ExposedPort>,
    scheme: String,
    auto_pull: bool,
}

impl ServiceSpec {
    /// Creates a spec for `name` running `image`.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            hostname: None,
            ports: Vec::new(),
            env: BTreeMap::new(),
            ready_marker: String::new(),
            depends_on: Vec::new(),
            endpoint_port: None,
            scheme: DEFAULT_SCHEME.to_string(),
            auto_pull: true,
        }
    }

    /// Sets the hostname other services use to reach this one.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Exposes a container port.
    #[must_use]
    pub fn port(mut self, port: ExposedPort) -> Self {
        self.ports.push(port);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the log text that signals the service finished starting.
    /// An empty marker means the service counts as ready at once.
    #[must_use]
    pub fn ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    /// Declares a service that must start before this one.
    #[must_use]
    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }

    /// Chooses which exposed port the endpoint is resolved for.
    /// Defaults to the first exposed port.
    #[must_use]
    pub const fn endpoint_port(mut self, port: ExposedPort) -> Self {
        self.endpoint_port = Some(port);
        self
    }

    /// Sets the URL scheme of the resolved endpoint.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets whether the image is pulled before the container starts.
    #[must_use]
    pub const fn auto_pull(mut self, pull: bool) -> Self {
        self.auto_pull = pull;
        self
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image reference.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Exposed ports.
    #[must_use]
    pub fn ports(&self) -> &[ExposedPort] {
        &self.ports
    }

    /// Readiness marker; empty when none is declared.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.ready_marker
    }

    /// Services that must start first.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Port the endpoint is resolved for, if any port is exposed.
    #[must_use]
    pub fn endpoint_target(&self) -> Option<ExposedPort> {
        self.endpoint_port.or_else(|| self.ports.first().copied())
    }

    /// URL scheme of the resolved endpoint.
    #[must_use]
    pub fn url_scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether the image is pulled before starting.
    #[must_use]
    pub const fn pulls_image(&self) -> bool {
        self.auto_pull
    }

    /// Builds the runtime request for this service.
    #[must_use]
    pub fn request(&self, container_name: &str, network: &str) -> ContainerRequest {
        ContainerRequest {
            name: container_name.to_string(),
            image: self.image.clone(),
            hostname: self.hostname.clone(),
            exposed_ports: self.ports.clone(),
            env: self.env.clone(),
            network: network.to_string(),
            auto_pull: self.auto_pull,
        }
    }
}

/// A started service: its container, readiness gate, log follower, and
/// endpoint once resolved.
#[derive(Debug)]
pub struct ServiceHandle {
    spec: ServiceSpec,
    container_name: String,
    container: ContainerId,
    gate: Option<Arc<ReadinessGate>>,
    follower: Option<LogFollower>,
    endpoint: Option<String>,
}

impl ServiceHandle {
    /// Wraps a container that the runtime reported as started.
    #[must_use]
    pub const fn new(spec: ServiceSpec, container_name: String, container: ContainerId) -> Self {
        Self {
            spec,
            container_name,
            container,
            gate: None,
            follower: None,
            endpoint: None,
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Definition the service was started from.
    #[must_use]
    pub const fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Container name, including the run suffix.
    #[must_use]
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Runtime identifier of the container.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.container
    }

    /// Resolved endpoint, absent until resolution succeeds.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Readiness gate, absent until logs are attached.
    #[must_use]
    pub fn gate(&self) -> Option<&ReadinessGate> {
        self.gate.as_deref()
    }

    pub(crate) fn shared_gate(&self) -> Option<Arc<ReadinessGate>> {
        self.gate.clone()
    }

    /// Attaches the log stream to a new gate and starts following it.
    pub fn follow_logs(&mut self, show_output: bool, lines: LogStream) -> Arc<ReadinessGate> {
        let gate = Arc::new(ReadinessGate::new(
            self.spec.name(),
            self.spec.marker(),
            show_output,
        ));
        self.follower = Some(LogFollower::spawn(Arc::clone(&gate), lines));
        self.gate = Some(Arc::clone(&gate));
        gate
    }

    /// Records the resolved endpoint. The first value wins.
    pub fn set_endpoint(&mut self, url: String) {
        if self.endpoint.is_none() {
            self.endpoint = Some(url);
        } else {
            tracing::debug!(service = %self.name(), "endpoint already resolved");
        }
    }

    /// Stops log consumption, then terminates the container.
    ///
    /// Both steps always run; their failures are returned, not raised.
    pub async fn terminate(&mut self, runtime: &dyn ContainerRuntime) -> Vec<GantryError> {
        let mut failures = Vec::new();

        if let Some(follower) = self.follower.take() {
            if let Err(e) = follower.stop().await {
                failures.push(e);
            }
        }

        if let Err(e) = runtime.terminate_container(&self.container).await {
            failures.push(GantryError::Teardown {
                resource: format!("container {}", self.container_name),
                reason: e.to_string(),
            });
        }

        failures
    }
}

/// Checks that names are unique and every dependency is declared.
///
/// # Errors
///
/// Returns a configuration error naming the offending service.
pub fn check_services(services: &[ServiceSpec]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for service in services {
        if service.name.is_empty() {
            return Err(GantryError::Config {
                message: "service name must not be empty".into(),
            });
        }
        if !seen.insert(service.name.as_str()) {
            return Err(GantryError::Config {
                message: format!("duplicate service name \"{}\"", service.name),
            });
        }
    }
    for service in services {
        for dep in &service.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(GantryError::NotFound {
                    kind: "service",
                    id: format!("{dep} (required by {})", service.name),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_run_names_and_settings() {
        let spec = ServiceSpec::new("policy", "ikolomiyets/demo-policy:1.0")
            .hostname("policies")
            .port(ExposedPort::tcp(8080))
            .env("DEBUG", "true")
            .auto_pull(false);

        let request = spec.request("policy-ab12cd34", "test-network-ab12cd34");
        assert_eq!(request.name, "policy-ab12cd34");
        assert_eq!(request.network, "test-network-ab12cd34");
        assert_eq!(request.hostname.as_deref(), Some("policies"));
        assert_eq!(request.env.get("DEBUG").map(String::as_str), Some("true"));
        assert!(!request.auto_pull);
    }

    #[test]
    fn endpoint_target_defaults_to_first_port() {
        let spec = ServiceSpec::new("web", "nginx")
            .port(ExposedPort::tcp(80))
            .port(ExposedPort::tcp(443));
        assert_eq!(spec.endpoint_target(), Some(ExposedPort::tcp(80)));

        let spec = spec.endpoint_port(ExposedPort::tcp(443));
        assert_eq!(spec.endpoint_target(), Some(ExposedPort::tcp(443)));

        assert_eq!(ServiceSpec::new("worker", "busybox").endpoint_target(), None);
    }

    #[test]
    fn check_services_rejects_duplicates() {
        let services = [ServiceSpec::new("a", "x"), ServiceSpec::new("a", "y")];
        let msg = check_services(&services).unwrap_err().to_string();
        assert!(msg.contains("duplicate"), "got: {msg}");
    }

    #[test]
    fn check_services_rejects_unknown_dependency() {
        let services = [ServiceSpec::new("gateway", "x").depends_on("policy")];
        let msg = check_services(&services).unwrap_err().to_string();
        assert!(msg.contains("policy"), "got: {msg}");
        assert!(msg.contains("gateway"), "got: {msg}");
    }

    #[test]
    fn set_endpoint_keeps_first_value() {
        let mut handle = ServiceHandle::new(
            ServiceSpec::new("policy", "x"),
            "policy-1".into(),
            ContainerId::new("ctr-1"),
        );
        assert_eq!(handle.endpoint(), None);
        handle.set_endpoint("http://localhost:1".into());
        handle.set_endpoint("http://localhost:2".into());
        assert_eq!(handle.endpoint(), Some("http://localhost:1"));
    }
}
