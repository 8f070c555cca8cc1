//! Scripted in-memory runtime.
//!
//! Records every primitive call in order, fails the operations it is told
//! to fail, and plays back scripted log lines. Orchestration tests use it
//! to check sequencing and teardown without a container engine.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use gantry_common::constants::DEFAULT_HOST;
use gantry_common::error::{GantryError, Result};
use gantry_common::types::{ContainerId, ExposedPort};
use tokio::sync::mpsc;

use super::{ContainerRequest, ContainerRuntime, NetworkHandle};
use crate::logs::LogStream;

const FIRST_HOST_PORT: u16 = 40_000;

/// In-memory [`ContainerRuntime`] driven by a script.
///
/// Services are addressed by their base name: a script for `policy`
/// applies to the container `policy-<suffix>`.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    operations: Vec<String>,
    failures: HashSet<(String, String)>,
    scripts: HashMap<String, Vec<String>>,
    containers: HashMap<ContainerId, Running>,
    networks: HashSet<String>,
    requests: Vec<ContainerRequest>,
    next_id: u32,
}

#[derive(Debug)]
struct Running {
    name: String,
    host_ports: HashMap<ExposedPort, u16>,
    log_tx: Option<mpsc::UnboundedSender<String>>,
    log_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl ScriptedRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` fail for `target`.
    ///
    /// `operation` is one of `create_network`, `remove_network`, `start`,
    /// `terminate`, `resolve_endpoint`, `stream_logs`. `target` is a
    /// service base name or the network prefix.
    pub fn fail_on(&self, operation: &str, target: &str) {
        let _ = self
            .lock()
            .failures
            .insert((operation.to_string(), target.to_string()));
    }

    /// Queues lines the service emits as soon as its logs are followed.
    pub fn script_logs<I, S>(&self, service: &str, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .scripts
            .entry(service.to_string())
            .or_default()
            .extend(lines.into_iter().map(Into::into));
    }

    /// Emits a line from a running service.
    ///
    /// Returns `false` if the service is not running.
    pub fn emit(&self, service: &str, line: impl Into<String>) -> bool {
        let inner = self.lock();
        inner
            .containers
            .values()
            .find(|c| belongs_to(&c.name, service))
            .and_then(|c| c.log_tx.as_ref())
            .is_some_and(|tx| tx.send(line.into()).is_ok())
    }

    /// Every primitive call so far, e.g. `start:policy-ab12cd34`.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }

    /// Names of containers that were started and not yet terminated.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Networks that were created and not yet removed.
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().networks.iter().cloned().collect();
        names.sort();
        names
    }

    /// Every container request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ContainerRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn record(&mut self, operation: &str, target: &str) -> Result<()> {
        self.operations.push(format!("{operation}:{target}"));
        let failing = self
            .failures
            .iter()
            .any(|(op, t)| op == operation && belongs_to(target, t));
        if failing {
            return Err(GantryError::runtime(
                scripted_operation(operation),
                target,
                "scripted failure",
            ));
        }
        Ok(())
    }

    fn container(&mut self, id: &ContainerId) -> Result<&mut Running> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| GantryError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    fn name_of(&self, id: &ContainerId) -> String {
        self.containers
            .get(id)
            .map_or_else(|| id.to_string(), |c| c.name.clone())
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        let mut inner = self.lock();
        inner.record("create_network", name)?;
        let _ = inner.networks.insert(name.to_string());
        Ok(NetworkHandle {
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<()> {
        let mut inner = self.lock();
        inner.record("remove_network", &network.name)?;
        if !inner.networks.remove(&network.name) {
            return Err(GantryError::NotFound {
                kind: "network",
                id: network.name.clone(),
            });
        }
        Ok(())
    }

    async fn start_container(&self, request: &ContainerRequest) -> Result<ContainerId> {
        let mut inner = self.lock();
        inner.requests.push(request.clone());
        inner.record("start", &request.name)?;
        if !inner.networks.contains(&request.network) {
            return Err(GantryError::NotFound {
                kind: "network",
                id: request.network.clone(),
            });
        }

        inner.next_id += 1;
        let id = ContainerId::new(format!("ctr-{}", inner.next_id));

        let mut host_ports = HashMap::new();
        for port in &request.exposed_ports {
            let offset = u16::try_from(inner.next_id * 100).unwrap_or(0);
            let host_port = FIRST_HOST_PORT
                .saturating_add(offset)
                .saturating_add(port.port % 100);
            let _ = host_ports.insert(*port, host_port);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for (service, lines) in &inner.scripts {
            if belongs_to(&request.name, service) {
                for line in lines {
                    let _ = tx.send(line.clone());
                }
            }
        }

        let _ = inner.containers.insert(
            id.clone(),
            Running {
                name: request.name.clone(),
                host_ports,
                log_tx: Some(tx),
                log_rx: Some(rx),
            },
        );
        Ok(id)
    }

    async fn terminate_container(&self, id: &ContainerId) -> Result<()> {
        let mut inner = self.lock();
        let name = inner.name_of(id);
        inner.record("terminate", &name)?;
        let _ = inner.containers.remove(id);
        Ok(())
    }

    async fn resolve_endpoint(
        &self,
        id: &ContainerId,
        port: ExposedPort,
        scheme: &str,
    ) -> Result<String> {
        let mut inner = self.lock();
        let name = inner.name_of(id);
        inner.record("resolve_endpoint", &name)?;
        let host_port = inner
            .container(id)?
            .host_ports
            .get(&port)
            .copied()
            .ok_or_else(|| GantryError::NotFound {
                kind: "published port",
                id: format!("{port} on container {name}"),
            })?;
        Ok(format!("{scheme}://{DEFAULT_HOST}:{host_port}"))
    }

    async fn stream_logs(&self, id: &ContainerId) -> Result<LogStream> {
        let mut inner = self.lock();
        let name = inner.name_of(id);
        inner.record("stream_logs", &name)?;
        let rx = inner
            .container(id)?
            .log_rx
            .take()
            .ok_or_else(|| GantryError::runtime("stream_logs", &name, "already followed"))?;
        let lines = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (Ok(line), rx))
        });
        Ok(lines.boxed())
    }
}

/// Whether a container or network name belongs to a service base name.
fn belongs_to(name: &str, service: &str) -> bool {
    name == service
        || name
            .strip_prefix(service)
            .is_some_and(|rest| rest.starts_with('-'))
}

fn scripted_operation(operation: &str) -> &'static str {
    match operation {
        "create_network" => "create_network",
        "remove_network" => "remove_network",
        "start" => "start_container",
        "terminate" => "terminate_container",
        "resolve_endpoint" => "resolve_endpoint",
        "stream_logs" => "stream_logs",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, network: &str) -> ContainerRequest {
        ContainerRequest {
            name: name.into(),
            image: "demo".into(),
            hostname: None,
            exposed_ports: vec![ExposedPort::tcp(8080)],
            env: Default::default(),
            network: network.into(),
            auto_pull: false,
        }
    }

    #[tokio::test]
    async fn records_operations_in_order() {
        let runtime = ScriptedRuntime::new();
        let net = runtime.create_network("test-network-x").await.unwrap();
        let id = runtime
            .start_container(&request("policy-x", "test-network-x"))
            .await
            .unwrap();
        runtime.terminate_container(&id).await.unwrap();
        runtime.remove_network(&net).await.unwrap();

        assert_eq!(
            runtime.operations(),
            vec![
                "create_network:test-network-x",
                "start:policy-x",
                "terminate:policy-x",
                "remove_network:test-network-x",
            ]
        );
        assert!(runtime.running().is_empty());
        assert!(runtime.networks().is_empty());
    }

    #[tokio::test]
    async fn scripted_failure_matches_service_base_name() {
        let runtime = ScriptedRuntime::new();
        runtime.fail_on("start", "customer");
        let _ = runtime.create_network("net").await.unwrap();

        assert!(runtime.start_container(&request("policy-1", "net")).await.is_ok());
        let err = runtime
            .start_container(&request("customer-1", "net"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start_container"));
        assert_eq!(runtime.running(), vec!["policy-1"]);
    }

    #[tokio::test]
    async fn scripted_and_emitted_lines_arrive_in_order() {
        let runtime = ScriptedRuntime::new();
        runtime.script_logs("policy", ["booting", "loading config"]);
        let _ = runtime.create_network("net").await.unwrap();
        let id = runtime
            .start_container(&request("policy-1", "net"))
            .await
            .unwrap();
        let mut logs = runtime.stream_logs(&id).await.unwrap();

        assert!(runtime.emit("policy", "Started DemoApplication in 3.2s"));
        runtime.terminate_container(&id).await.unwrap();

        let mut lines = Vec::new();
        while let Some(line) = logs.next().await {
            lines.push(line.unwrap());
        }
        assert_eq!(
            lines,
            vec!["booting", "loading config", "Started DemoApplication in 3.2s"]
        );
    }

    #[tokio::test]
    async fn endpoint_resolution_requires_published_port() {
        let runtime = ScriptedRuntime::new();
        let _ = runtime.create_network("net").await.unwrap();
        let id = runtime
            .start_container(&request("policy-1", "net"))
            .await
            .unwrap();

        let url = runtime
            .resolve_endpoint(&id, ExposedPort::tcp(8080), "http")
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:"), "got: {url}");
        assert!(
            runtime
                .resolve_endpoint(&id, ExposedPort::tcp(9999), "http")
                .await
                .is_err()
        );
    }

    #[test]
    fn belongs_to_requires_separator() {
        assert!(belongs_to("policy-ab12", "policy"));
        assert!(belongs_to("policy", "policy"));
        assert!(!belongs_to("policyx-ab12", "policy"));
        assert!(belongs_to("test-network-ab12", "test-network"));
    }
}
