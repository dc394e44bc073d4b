#![forbid(unsafe_code)]

//! `cldpd` dispatches Claude Code agent pods to Docker containers.
//!
//! Each pod is a directory holding a Dockerfile plus optional configuration
//! (`pod.json`) and prompt template (`template.md`). The [`Dispatcher`]
//! builds the pod's image, runs the agent inside a container pointed at a
//! GitHub issue, and streams the container's lifecycle transitions and
//! line-buffered stdout back to the caller as typed [`Event`]s through a
//! caller-owned [`Session`].

pub mod codec;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod pod;
pub mod runner;
pub mod session;

pub use dispatcher::Dispatcher;
pub use errors::{DispatchError, Result};
pub use event::{Event, EventKind, EventStream};
pub use pod::{Pod, PodConfig};
pub use runner::docker::DockerRunner;
pub use runner::{Mount, RunOptions, Runner};
pub use session::Session;
