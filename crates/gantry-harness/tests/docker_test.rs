//! Runs against a real Docker daemon. Ignored by default:
//! `cargo test -p gantry-harness -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use gantry_common::config::HarnessConfig;
use gantry_common::types::ExposedPort;
use gantry_harness::orchestrator::Orchestrator;
use gantry_harness::service::ServiceSpec;
use gantry_runtime::backend::docker::DockerRuntime;

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn nginx_becomes_ready_and_is_removed() {
    let runtime = Arc::new(DockerRuntime::connect().expect("docker client"));
    runtime.ping().await.expect("docker daemon reachable");

    let services = [ServiceSpec::new("web", "nginx:alpine")
        .hostname("web")
        .port(ExposedPort::tcp(80))
        .ready_marker("start worker process")];

    let outcome = Orchestrator::new(runtime, HarnessConfig::default())
        .run(&services, |endpoints| async move {
            let url = endpoints.get("web").unwrap_or_default().to_string();
            i32::from(!url.starts_with("http://"))
        })
        .await
        .expect("nginx starts");

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.teardown.is_clean(), "{:?}", outcome.teardown);
}
