//! # gantry-harness
//!
//! Boots interdependent service containers for integration tests, gates
//! each one on a log marker, and tears everything down in reverse order.
//!
//! - [`ReadinessGate`](readiness::ReadinessGate): watches a log stream for a marker.
//! - [`Orchestrator`](orchestrator::Orchestrator): network, services in
//!   dependency order, readiness waits, teardown.
//! - [`Plan`](plan::Plan): YAML description of a run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gantry_common::config::HarnessConfig;
//! use gantry_common::types::ExposedPort;
//! use gantry_harness::orchestrator::Orchestrator;
//! use gantry_harness::service::ServiceSpec;
//! use gantry_runtime::backend::docker::DockerRuntime;
//!
//! # async fn demo() -> gantry_common::error::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let services = [ServiceSpec::new("policy", "ikolomiyets/demo-policy:1.4.2")
//!     .hostname("policies")
//!     .port(ExposedPort::tcp(8080))
//!     .ready_marker("Started PolicyDemoApplication in")];
//!
//! let outcome = Orchestrator::new(runtime, HarnessConfig::default())
//!     .run(&services, |endpoints| async move {
//!         i32::from(endpoints.get("policy").is_none())
//!     })
//!     .await?;
//! assert_eq!(outcome.exit_code, 0);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod endpoints;
pub mod graph;
pub mod network;
pub mod orchestrator;
pub mod plan;
pub mod readiness;
pub mod service;
pub mod teardown;

pub use endpoints::Endpoints;
pub use orchestrator::{Orchestrator, Phase, RunOutcome};
pub use plan::Plan;
pub use readiness::ReadinessGate;
pub use service::{ServiceHandle, ServiceSpec};
