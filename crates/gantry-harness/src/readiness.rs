//! Log-driven readiness detection.
//!
//! A [`ReadinessGate`] watches one container's output for a textual marker.
//! The log side calls [`observe`](ReadinessGate::observe) for every line;
//! the orchestration side awaits [`wait_ready`](ReadinessGate::wait_ready),
//! which races the readiness publication against a timer.
//!
//! [`LogFollower`] is the task that feeds a gate from a [`LogStream`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gantry_common::constants::CONTAINER_LOG_TARGET;
use gantry_common::error::{GantryError, Result};
use gantry_runtime::LogStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Readiness state of one service, driven by its log lines.
///
/// The `ready` flag only ever moves from `false` to `true`. A gate with an
/// empty marker is ready from construction.
#[derive(Debug)]
pub struct ReadinessGate {
    service: String,
    marker: String,
    show_output: bool,
    ready: watch::Sender<bool>,
}

impl ReadinessGate {
    /// Creates a gate for `service` waiting on `marker`.
    ///
    /// With `show_output` every observed line is echoed through the
    /// `gantry::container` log target as `<service> - <line>`.
    #[must_use]
    pub fn new(service: impl Into<String>, marker: impl Into<String>, show_output: bool) -> Self {
        let marker = marker.into();
        let (ready, _) = watch::channel(marker.is_empty());
        Self {
            service: service.into(),
            marker,
            show_output,
            ready,
        }
    }

    /// Service this gate belongs to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Marker this gate waits for; empty when none was declared.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether the marker has been seen (or none was declared).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Feeds one log line. Never blocks.
    pub fn observe(&self, line: &str) {
        if self.show_output {
            tracing::info!(target: CONTAINER_LOG_TARGET, "{} - {line}", self.service);
        }
        if self.marker.is_empty() || !line.contains(&self.marker) {
            return;
        }

        let flipped = self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if flipped {
            tracing::info!(service = %self.service, marker = %self.marker, "service is ready");
        }
    }

    /// Waits until the gate is ready or `timeout` elapses.
    ///
    /// Returns immediately for a gate that is already ready, including one
    /// with an empty marker.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::ReadinessTimeout`] if the marker is not
    /// observed within `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut ready = self.ready.subscribe();
        match tokio::time::timeout(timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(GantryError::ReadinessTimeout {
                service: self.service.clone(),
                marker: self.marker.clone(),
                timeout,
            }),
        }
    }
}

/// Background task that feeds a container's log lines into its gate.
#[derive(Debug)]
pub struct LogFollower {
    service: String,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LogFollower {
    /// Spawns a task on the current runtime that observes every line of
    /// `lines` in order until the stream ends or the follower is stopped.
    #[must_use]
    pub fn spawn(gate: Arc<ReadinessGate>, mut lines: LogStream) -> Self {
        let service = gate.service().to_string();
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    next = lines.next() => match next {
                        Some(Ok(line)) => gate.observe(&line),
                        Some(Err(e)) => {
                            tracing::warn!(service = %gate.service(), error = %e, "log stream failed");
                            break;
                        }
                        None => {
                            tracing::debug!(service = %gate.service(), "log stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            service,
            stop: Some(stop),
            task,
        }
    }

    /// Whether the task has finished on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops following and waits for the task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::Teardown`] if the task panicked.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.map_err(|e| GantryError::Teardown {
            resource: format!("log follower of {}", self.service),
            reason: e.to_string(),
        })
    }
}
