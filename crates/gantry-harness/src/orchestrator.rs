//! Ordered startup, readiness gating, and guaranteed teardown of a run.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use gantry_common::config::{HarnessConfig, WaitMode};
use gantry_common::constants::TEST_PANIC_EXIT_CODE;
use gantry_common::error::{GantryError, Result};
use gantry_common::types::RunSuffix;
use gantry_runtime::ContainerRuntime;

use crate::endpoints::Endpoints;
use crate::graph::startup_order;
use crate::network::NetworkScope;
use crate::service::{ServiceHandle, ServiceSpec};
use crate::teardown::{TeardownReport, TeardownStack};

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Nothing acquired yet.
    Idle,
    /// The run's network exists.
    NetworkCreated,
    /// The named service is being started.
    Starting(String),
    /// The named service passed its readiness gate.
    Ready(String),
    /// Every service is started and gated.
    AllReady,
    /// The test phase is executing.
    Running,
    /// Acquired resources are being released.
    TearingDown,
    /// Everything is released.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::NetworkCreated => write!(f, "network created"),
            Self::Starting(s) => write!(f, "starting {s}"),
            Self::Ready(s) => write!(f, "{s} ready"),
            Self::AllReady => write!(f, "all ready"),
            Self::Running => write!(f, "running tests"),
            Self::TearingDown => write!(f, "tearing down"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Result of a complete run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Exit code reported by the test phase.
    pub exit_code: i32,
    /// What teardown released and what failed.
    pub teardown: TeardownReport,
}

/// Drives one run: network, services in dependency order, readiness
/// gates, and reverse-order teardown.
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    config: HarnessConfig,
    suffix: RunSuffix,
    phase: Phase,
    stack: TeardownStack,
    endpoints: Endpoints,
}

impl Orchestrator {
    /// Creates an orchestrator with a fresh run suffix.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: HarnessConfig) -> Self {
        Self {
            runtime,
            config,
            suffix: RunSuffix::generate(),
            phase: Phase::Idle,
            stack: TeardownStack::new(),
            endpoints: Endpoints::new(),
        }
    }

    /// Uses a caller-chosen run suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: RunSuffix) -> Self {
        self.suffix = suffix;
        self
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Suffix shared by every resource of this run.
    #[must_use]
    pub const fn suffix(&self) -> &RunSuffix {
        &self.suffix
    }

    /// The run's network, once created.
    #[must_use]
    pub const fn network(&self) -> Option<&NetworkScope> {
        self.stack.network()
    }

    /// Services started so far, in start order.
    #[must_use]
    pub fn services(&self) -> &[ServiceHandle] {
        self.stack.services()
    }

    /// Endpoints resolved so far.
    #[must_use]
    pub const fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Starts every service and waits on the declared readiness gates.
    ///
    /// On failure everything acquired so far is torn down in reverse
    /// order before the error is returned.
    ///
    /// If the returned future is dropped before it completes, whatever was
    /// acquired stays on the teardown stack: [`shutdown`](Self::shutdown)
    /// releases it, and so does dropping the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid services (nothing is
    /// acquired), or the first startup, endpoint, or readiness failure.
    pub async fn start(&mut self, services: &[ServiceSpec]) -> Result<Endpoints> {
        if self.phase != Phase::Idle {
            return Err(GantryError::Config {
                message: format!("run already started (phase: {})", self.phase),
            });
        }
        let ordered = startup_order(services)?;

        match self.acquire(&ordered).await {
            Ok(()) => {
                self.transition(Phase::AllReady);
                tracing::info!(
                    services = self.stack.services().len(),
                    network = %self.stack.network().map_or("", NetworkScope::name),
                    "all services ready"
                );
                Ok(self.endpoints.clone())
            }
            Err(e) => {
                tracing::error!(phase = %self.phase, error = %e, "startup failed");
                let _report = self.shutdown().await;
                Err(e)
            }
        }
    }

    /// Releases everything acquired, top to bottom. Safe to call more
    /// than once; later calls release nothing.
    pub async fn shutdown(&mut self) -> TeardownReport {
        self.transition(Phase::TearingDown);
        let report = self.stack.unwind(self.runtime.as_ref()).await;
        self.transition(Phase::Done);
        report
    }

    /// Starts the services, runs `test_phase` with their endpoints, and
    /// always tears down afterwards.
    ///
    /// The test phase's exit code is returned untouched; teardown failures
    /// are reported alongside it. A panicking test phase counts as exit
    /// code 101. This relies on unwinding: under `panic = "abort"` a panic
    /// ends the process before teardown.
    ///
    /// # Errors
    ///
    /// Returns the startup failure if the services could not be brought
    /// up; the test phase does not run in that case.
    pub async fn run<F, Fut>(mut self, services: &[ServiceSpec], test_phase: F) -> Result<RunOutcome>
    where
        F: FnOnce(Endpoints) -> Fut,
        Fut: Future<Output = i32>,
    {
        let endpoints = self.start(services).await?;
        Ok(self.run_started(endpoints, test_phase).await)
    }

    /// Runs `test_phase` against services already brought up by
    /// [`start`](Self::start), then tears down.
    ///
    /// Lets callers race `start` against their own cancellation signal and
    /// call [`shutdown`](Self::shutdown) when it wins.
    pub async fn run_started<F, Fut>(mut self, endpoints: Endpoints, test_phase: F) -> RunOutcome
    where
        F: FnOnce(Endpoints) -> Fut,
        Fut: Future<Output = i32>,
    {
        self.transition(Phase::Running);
        let exit_code = AssertUnwindSafe(test_phase(endpoints))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!("test phase panicked");
                TEST_PANIC_EXIT_CODE
            });
        tracing::info!(exit_code, "test phase finished");

        let teardown = self.shutdown().await;
        RunOutcome {
            exit_code,
            teardown,
        }
    }

    async fn acquire(&mut self, services: &[&ServiceSpec]) -> Result<()> {
        let network = NetworkScope::create(
            self.runtime.as_ref(),
            &self.config.network_prefix,
            &self.suffix,
        )
        .await
        .map_err(|e| GantryError::startup("creating network", e))?;
        let network_name = network.name().to_string();
        self.stack.push_network(network);
        self.transition(Phase::NetworkCreated);

        for spec in services {
            self.start_service(spec, &network_name).await?;
        }

        if self.config.wait_mode == WaitMode::AfterAll {
            let timeout = self.config.ready_timeout();
            let gates: Vec<_> = self
                .stack
                .services()
                .iter()
                .filter_map(ServiceHandle::shared_gate)
                .filter(|gate| !gate.marker().is_empty())
                .collect();
            for gate in gates {
                tracing::info!(service = %gate.service(), marker = %gate.marker(), "waiting for readiness");
                gate.wait_ready(timeout).await?;
                self.transition(Phase::Ready(gate.service().to_string()));
            }
        }
        Ok(())
    }

    async fn start_service(&mut self, spec: &ServiceSpec, network: &str) -> Result<()> {
        let name = spec.name().to_string();
        self.transition(Phase::Starting(name.clone()));

        let container_name = self.suffix.apply(&name);
        let request = spec.request(&container_name, network);
        let id = self
            .runtime
            .start_container(&request)
            .await
            .map_err(|e| GantryError::startup(format!("starting {name}"), e))?;
        tracing::info!(service = %name, container = %container_name, image = %spec.image(), "service started");

        let handle = self
            .stack
            .push_service(ServiceHandle::new(spec.clone(), container_name, id.clone()));

        let lines = self
            .runtime
            .stream_logs(&id)
            .await
            .map_err(|e| GantryError::startup(format!("attaching logs of {name}"), e))?;
        let gate = handle.follow_logs(self.config.show_output, lines);

        if let Some(port) = spec.endpoint_target() {
            let url = self
                .runtime
                .resolve_endpoint(&id, port, spec.url_scheme())
                .await
                .map_err(|e| GantryError::EndpointResolution {
                    service: name.clone(),
                    port: port.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::info!(service = %name, url = %url, "endpoint resolved");
            handle.set_endpoint(url.clone());
            self.endpoints.insert(name.clone(), url);
        } else {
            tracing::debug!(service = %name, "no exposed port, endpoint not resolved");
        }

        if self.config.wait_mode == WaitMode::BeforeDependents && !gate.marker().is_empty() {
            tracing::info!(service = %name, marker = %gate.marker(), "waiting for readiness");
            gate.wait_ready(self.config.ready_timeout()).await?;
            self.transition(Phase::Ready(name));
        }
        Ok(())
    }

    fn transition(&mut self, next: Phase) {
        tracing::debug!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("suffix", &self.suffix)
            .field("phase", &self.phase)
            .field("config", &self.config)
            .field("stack", &self.stack)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        let stack = std::mem::take(&mut self.stack);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    phase = %self.phase,
                    resources = stack.len(),
                    "orchestrator dropped without shutdown; releasing in background"
                );
                let _ = handle.spawn(release_abandoned(Arc::clone(&self.runtime), stack));
            }
            Err(_) => {
                tracing::warn!(
                    phase = %self.phase,
                    resources = stack.len(),
                    "orchestrator dropped outside an async runtime; resources leaked"
                );
            }
        }
    }
}

async fn release_abandoned(runtime: Arc<dyn ContainerRuntime>, mut stack: TeardownStack) {
    let report = stack.unwind(runtime.as_ref()).await;
    tracing::info!(
        released = report.released().len(),
        failed = report.failures().len(),
        "abandoned run released"
    );
}
