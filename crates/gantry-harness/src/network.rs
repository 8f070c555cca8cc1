//! Per-run network shared by every service.

use gantry_common::error::{GantryError, Result};
use gantry_common::types::RunSuffix;
use gantry_runtime::{ContainerRuntime, NetworkHandle};

/// The network one run's services join.
///
/// Membership is tracked by service name only; the services themselves are
/// owned by the orchestrator.
#[derive(Debug)]
pub struct NetworkScope {
    handle: NetworkHandle,
    members: Vec<String>,
}

impl NetworkScope {
    /// Creates the network `<prefix>-<suffix>`.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error if the network cannot be created.
    pub async fn create(
        runtime: &dyn ContainerRuntime,
        prefix: &str,
        suffix: &RunSuffix,
    ) -> Result<Self> {
        let name = suffix.apply(prefix);
        let handle = runtime.create_network(&name).await?;
        tracing::info!(network = %handle.name, "network created");
        Ok(Self {
            handle,
            members: Vec::new(),
        })
    }

    /// Network name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Services currently attached, in attach order.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Records that `service` joined the network.
    pub fn attach(&mut self, service: &str) {
        self.members.push(service.to_string());
    }

    /// Records that `service` left the network.
    pub fn detach(&mut self, service: &str) {
        self.members.retain(|m| m != service);
    }

    /// Removes the network.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::Teardown`] if the runtime refuses.
    pub async fn remove(&self, runtime: &dyn ContainerRuntime) -> Result<()> {
        if !self.members.is_empty() {
            tracing::warn!(
                network = %self.name(),
                members = ?self.members,
                "removing network with services still attached"
            );
        }
        runtime
            .remove_network(&self.handle)
            .await
            .map_err(|e| GantryError::Teardown {
                resource: format!("network {}", self.handle.name),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use gantry_runtime::backend::scripted::ScriptedRuntime;

    use super::*;

    #[tokio::test]
    async fn network_name_carries_run_suffix() {
        let runtime = ScriptedRuntime::new();
        let scope = NetworkScope::create(&runtime, "test-network", &RunSuffix::fixed("ab12cd34"))
            .await
            .expect("network");
        assert_eq!(scope.name(), "test-network-ab12cd34");
        assert_eq!(runtime.networks(), vec!["test-network-ab12cd34"]);
    }

    #[tokio::test]
    async fn membership_follows_attach_and_detach() {
        let runtime = ScriptedRuntime::new();
        let mut scope = NetworkScope::create(&runtime, "net", &RunSuffix::fixed("x"))
            .await
            .expect("network");
        scope.attach("policy");
        scope.attach("customer");
        scope.detach("policy");
        assert_eq!(scope.members(), ["customer".to_string()]);
    }

    #[tokio::test]
    async fn remove_failure_is_a_teardown_error() {
        let runtime = ScriptedRuntime::new();
        runtime.fail_on("remove_network", "net");
        let scope = NetworkScope::create(&runtime, "net", &RunSuffix::fixed("x"))
            .await
            .expect("network");
        let err = scope.remove(&runtime).await.expect_err("scripted failure");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("network net-x"), "got: {err}");
    }
}
