//! Container runtime facility for the gantry harness.
//!
//! The [`ContainerRuntime`](backend::ContainerRuntime) trait is the seam
//! between orchestration and the container engine. Two backends ship with
//! the crate: the Docker Engine client and a scripted in-memory runtime
//! for exercising orchestration without a daemon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod logs;

pub use backend::{ContainerRequest, ContainerRuntime, NetworkHandle};
pub use logs::LogStream;
