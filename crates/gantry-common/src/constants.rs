//! Workspace-wide constants and defaults.

/// Application name used in log output and resource labels.
pub const APP_NAME: &str = "gantry";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "gantry";

/// Prefix of the per-run network name.
pub const DEFAULT_NETWORK_PREFIX: &str = "test-network";

/// Driver used for the per-run network.
pub const NETWORK_DRIVER: &str = "bridge";

/// Default budget for a readiness marker to appear, in seconds.
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Number of characters in a run suffix.
pub const RUN_SUFFIX_LEN: usize = 8;

/// Scheme used when a service does not declare one.
pub const DEFAULT_SCHEME: &str = "http";

/// Host address endpoints are published on.
pub const DEFAULT_HOST: &str = "localhost";

/// `tracing` target for echoed container output.
pub const CONTAINER_LOG_TARGET: &str = "gantry::container";

/// Prefix of the environment variables that carry endpoints to the test command.
pub const ENDPOINT_ENV_PREFIX: &str = "GANTRY_";

/// Suffix of the environment variables that carry endpoints to the test command.
pub const ENDPOINT_ENV_SUFFIX: &str = "_URL";

/// Default version-resolution service.
pub const DEFAULT_VERSIONS_URL: &str = "https://artifactor.artifactz.io";

/// Stage whose pinned versions are used for image tags.
pub const VERSIONS_STAGE: &str = "Integration Test";

/// Client identifier sent to the version-resolution service.
pub const VERSIONS_CLIENT_ID: &str = "Integration Test";

/// Label attached to every container and network gantry creates.
pub const RUN_LABEL: &str = "io.gantry.run";

/// Exit code reported when the test phase panics.
pub const TEST_PANIC_EXIT_CODE: i32 = 101;
