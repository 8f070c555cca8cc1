//! Harness configuration model.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the orchestrator waits on readiness gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// A service with a marker must be ready before the next one starts.
    #[default]
    BeforeDependents,
    /// Start everything, then wait on every gate in start order.
    AfterAll,
}

/// Settings for one orchestration run.
///
/// Built once (from defaults, the plan file, and CLI flags) and passed
/// explicitly to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Prefix of the per-run network name.
    pub network_prefix: String,
    /// Budget for each readiness marker, in seconds.
    pub ready_timeout_secs: u64,
    /// When readiness gates are awaited.
    pub wait_mode: WaitMode,
    /// Echo every container log line through the logger.
    pub show_output: bool,
    /// Use locally built images and never pull.
    pub local_images: bool,
}

impl HarnessConfig {
    /// Readiness budget as a [`Duration`].
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            network_prefix: crate::constants::DEFAULT_NETWORK_PREFIX.to_string(),
            ready_timeout_secs: crate::constants::DEFAULT_READY_TIMEOUT_SECS,
            wait_mode: WaitMode::default(),
            show_output: false,
            local_images: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_harness() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.network_prefix, "test-network");
        assert_eq!(cfg.ready_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.wait_mode, WaitMode::BeforeDependents);
        assert!(!cfg.show_output);
        assert!(!cfg.local_images);
    }

    #[test]
    fn partial_settings_keep_remaining_defaults() {
        let cfg: HarnessConfig =
            serde_yaml::from_str("wait_mode: after-all\nready_timeout_secs: 5\n").expect("yaml");
        assert_eq!(cfg.wait_mode, WaitMode::AfterAll);
        assert_eq!(cfg.ready_timeout_secs, 5);
        assert_eq!(cfg.network_prefix, "test-network");
    }

    #[test]
    fn unknown_settings_are_rejected() {
        let result: Result<HarnessConfig, _> = serde_yaml::from_str("retries: 3\n");
        assert!(result.is_err());
    }
}
