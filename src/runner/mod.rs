//! Container runner abstraction.
//!
//! The [`Runner`] trait decouples the dispatch core (pod discovery, the
//! session machine, the CLI) from the container backend. The production
//! implementation is [`DockerRunner`](docker::DockerRunner), a thin wrapper
//! over the `docker` binary; tests substitute mock runners.

pub mod docker;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Boxed future returned by [`Runner`] methods.
pub type RunnerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A bind mount passed to the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Host path. `~` and `~/` prefixes are expanded at pod discovery time.
    pub source: String,
    /// Container path.
    pub target: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Configuration for a `docker run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Docker image to run.
    pub image: String,
    /// Container name (`--name`); empty means unnamed.
    pub name: String,
    /// Command and arguments to run inside the container.
    pub cmd: Vec<String>,
    /// Environment variables passed as `-e K=V`.
    pub env: HashMap<String, String>,
    /// Host env var names forwarded as bare `-e NAME`. Names also present
    /// in `env` are not re-emitted.
    pub inherit_env: Vec<String>,
    /// Working directory inside the container (`-w`).
    pub workdir: Option<String>,
    /// Remove the container after it exits (`--rm`).
    pub remove: bool,
    /// Bind mounts (`-v source:target[:ro]`).
    pub mounts: Vec<Mount>,
}

/// Interface over container CLI operations.
///
/// All methods block until the operation completes and stream output to the
/// provided writer where applicable. Cancelling the token terminates the
/// underlying CLI process.
pub trait Runner: Send + Sync {
    /// Probe that the container runtime is reachable.
    ///
    /// Idempotent and side-effect-free.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DockerUnavailable`](crate::DispatchError::DockerUnavailable)
    /// when the runtime cannot be contacted or `cancel` has already fired.
    fn preflight<'a>(&'a self, cancel: &'a CancellationToken) -> RunnerFuture<'a, ()>;

    /// Build an image tagged `tag` from the Dockerfile in `dir`.
    ///
    /// `build_args` are passed as `--build-arg K=V` flags.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::BuildFailed`](crate::DispatchError::BuildFailed)
    /// if the build exits non-zero (wrapping the captured stderr verbatim)
    /// or fails to spawn.
    fn build<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        tag: &'a str,
        dir: &'a Path,
        build_args: &'a HashMap<String, String>,
    ) -> RunnerFuture<'a, ()>;

    /// Start a container with `opts`, stream its stdout to `stdout`, and
    /// block until it exits.
    ///
    /// A non-zero child exit code is returned as `Ok(code)` — the caller
    /// interprets it. `Err` is reserved for spawn and transport failures.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Io`](crate::DispatchError::Io) for spawn or
    /// stream failures and [`DispatchError::Cancelled`](crate::DispatchError::Cancelled)
    /// when the token fires mid-run (the child is killed).
    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        opts: &'a RunOptions,
        stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> RunnerFuture<'a, i32>;

    /// Run a command in an already-running container, streaming its stdout.
    ///
    /// Same exit-code contract as [`Runner::run`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::SessionNotFound`](crate::DispatchError::SessionNotFound)
    /// if `container` does not exist or is not running.
    fn exec<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        container: &'a str,
        cmd: &'a [String],
        stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> RunnerFuture<'a, i32>;

    /// Request graceful termination of `container`, waiting up to `timeout`
    /// (floored to one second) before the runtime escalates to SIGKILL.
    ///
    /// A container that no longer exists is treated as already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::StopFailed`](crate::DispatchError::StopFailed)
    /// on any other non-zero exit or when the stop command cannot be spawned.
    fn stop<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        container: &'a str,
        timeout: Duration,
    ) -> RunnerFuture<'a, ()>;
}
