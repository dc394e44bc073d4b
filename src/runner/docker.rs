//! Docker CLI runner.
//!
//! Implements [`Runner`] by shelling out to the `docker` binary with
//! `tokio::process::Command`. Every child is spawned with
//! `kill_on_drop(true)` so cancelling the token (which drops the in-flight
//! future) also terminates the CLI process.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::runner::{RunOptions, Runner, RunnerFuture};
use crate::DispatchError;

const DOCKER_BIN: &str = "docker";

/// [`Runner`] implementation backed by the Docker CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerRunner;

impl DockerRunner {
    /// Create a Docker CLI runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

// ── CLI argument builders ────────────────────────────────────────────────────

/// Docker CLI arguments for a build invocation:
/// `build -t <tag> [--build-arg K=V]* <dir>`.
#[must_use]
pub fn build_args(tag: &str, dir: &Path, build_args: &HashMap<String, String>) -> Vec<String> {
    let mut args = vec!["build".to_owned(), "-t".to_owned(), tag.to_owned()];
    for (k, v) in build_args {
        args.push("--build-arg".to_owned());
        args.push(format!("{k}={v}"));
    }
    args.push(dir.display().to_string());
    args
}

/// Docker CLI arguments for a run invocation.
///
/// `inherit_env` names whose values were already resolved into `env` are
/// skipped here; the rest are emitted as bare `-e NAME` so Docker inherits
/// them from the host environment at spawn time.
#[must_use]
pub fn run_args(opts: &RunOptions) -> Vec<String> {
    let mut args = vec!["run".to_owned()];
    if opts.remove {
        args.push("--rm".to_owned());
    }
    if !opts.name.is_empty() {
        args.push("--name".to_owned());
        args.push(opts.name.clone());
    }
    for (k, v) in &opts.env {
        args.push("-e".to_owned());
        args.push(format!("{k}={v}"));
    }
    for name in &opts.inherit_env {
        if opts.env.contains_key(name) {
            // Already emitted as -e K=V above.
            continue;
        }
        args.push("-e".to_owned());
        args.push(name.clone());
    }
    for mount in &opts.mounts {
        let mut flag = format!("{}:{}", mount.source, mount.target);
        if mount.read_only {
            flag.push_str(":ro");
        }
        args.push("-v".to_owned());
        args.push(flag);
    }
    if let Some(ref workdir) = opts.workdir {
        args.push("-w".to_owned());
        args.push(workdir.clone());
    }
    args.push(opts.image.clone());
    args.extend(opts.cmd.iter().cloned());
    args
}

/// Docker CLI arguments for an exec invocation: `exec <container> CMD…`.
#[must_use]
pub fn exec_args(container: &str, cmd: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_owned(), container.to_owned()];
    args.extend(cmd.iter().cloned());
    args
}

/// Docker CLI arguments for a stop invocation: `stop -t <secs> <container>`.
///
/// docker stop takes whole seconds; a sub-second timeout is floored to one
/// second because zero would mean an immediate SIGKILL.
#[must_use]
pub fn stop_args(container: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1);
    vec![
        "stop".to_owned(),
        "-t".to_owned(),
        secs.to_string(),
        container.to_owned(),
    ]
}

// ── Runner implementation ────────────────────────────────────────────────────

impl Runner for DockerRunner {
    fn preflight<'a>(&'a self, cancel: &'a CancellationToken) -> RunnerFuture<'a, ()> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(DispatchError::DockerUnavailable(
                    "cancelled before probe".to_owned(),
                ));
            }
            let status = Command::new(DOCKER_BIN)
                .arg("info")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;
            match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(DispatchError::DockerUnavailable(format!(
                    "docker info exit code {}",
                    s.code().unwrap_or(-1)
                ))),
                Err(err) => Err(DispatchError::DockerUnavailable(format!(
                    "docker info: {err}"
                ))),
            }
        })
    }

    fn build<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        tag: &'a str,
        dir: &'a Path,
        args_map: &'a HashMap<String, String>,
    ) -> RunnerFuture<'a, ()> {
        Box::pin(async move {
            let args = build_args(tag, dir, args_map);
            debug!(tag, dir = %dir.display(), "docker build starting");
            let mut cmd = Command::new(DOCKER_BIN);
            cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);
            let output = tokio::select! {
                output = cmd.output() => output
                    .map_err(|err| DispatchError::BuildFailed(format!("docker build: {err}")))?,
                () = cancel.cancelled() => {
                    return Err(DispatchError::BuildFailed("build cancelled".to_owned()));
                }
            };
            if output.status.success() {
                info!(tag, "docker build complete");
                return Ok(());
            }
            // The captured stderr goes into the error verbatim; the useful
            // part of a Docker build failure is the raw diagnostic text.
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DispatchError::BuildFailed(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr
            )))
        })
    }

    fn run<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        opts: &'a RunOptions,
        stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> RunnerFuture<'a, i32> {
        Box::pin(async move {
            let args = run_args(opts);
            info!(container = %opts.name, image = %opts.image, "docker run starting");
            let mut cmd = Command::new(DOCKER_BIN);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            let mut child = cmd
                .spawn()
                .map_err(|err| DispatchError::Io(format!("docker run: {err}")))?;
            let mut child_stdout = child
                .stdout
                .take()
                .ok_or_else(|| DispatchError::Io("docker run: stdout not captured".to_owned()))?;

            let wait = async {
                tokio::io::copy(&mut child_stdout, stdout)
                    .await
                    .map_err(|err| DispatchError::Io(format!("docker run: stream stdout: {err}")))?;
                child
                    .wait()
                    .await
                    .map_err(|err| DispatchError::Io(format!("docker run: {err}")))
            };
            tokio::select! {
                status = wait => {
                    let status = status?;
                    Ok(status.code().unwrap_or(-1))
                }
                () = cancel.cancelled() => {
                    // Dropping the wait future drops the child handle, and
                    // kill_on_drop terminates the CLI process.
                    debug!(container = %opts.name, "docker run cancelled");
                    Err(DispatchError::Cancelled("docker run interrupted".to_owned()))
                }
            }
        })
    }

    fn exec<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        container: &'a str,
        exec_cmd: &'a [String],
        stdout: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> RunnerFuture<'a, i32> {
        Box::pin(async move {
            // Probe that the container exists and is running before the exec.
            // docker inspect exits non-zero for an unknown container.
            let probe = Command::new(DOCKER_BIN)
                .args(["inspect", "--format", "{{.State.Running}}", container])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await;
            let running = match probe {
                Ok(out) if out.status.success() => {
                    String::from_utf8_lossy(&out.stdout).trim() == "true"
                }
                _ => false,
            };
            if !running {
                return Err(DispatchError::SessionNotFound(container.to_owned()));
            }

            let args = exec_args(container, exec_cmd);
            info!(container, "docker exec starting");
            let mut cmd = Command::new(DOCKER_BIN);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);
            let mut child = cmd
                .spawn()
                .map_err(|err| DispatchError::Io(format!("docker exec: {err}")))?;
            let mut child_stdout = child
                .stdout
                .take()
                .ok_or_else(|| DispatchError::Io("docker exec: stdout not captured".to_owned()))?;

            let wait = async {
                tokio::io::copy(&mut child_stdout, stdout)
                    .await
                    .map_err(|err| DispatchError::Io(format!("docker exec: stream stdout: {err}")))?;
                child
                    .wait()
                    .await
                    .map_err(|err| DispatchError::Io(format!("docker exec: {err}")))
            };
            tokio::select! {
                status = wait => {
                    let status = status?;
                    Ok(status.code().unwrap_or(-1))
                }
                () = cancel.cancelled() => {
                    debug!(container, "docker exec cancelled");
                    Err(DispatchError::Cancelled("docker exec interrupted".to_owned()))
                }
            }
        })
    }

    fn stop<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        container: &'a str,
        timeout: Duration,
    ) -> RunnerFuture<'a, ()> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(DispatchError::StopFailed(
                    "cancelled before docker stop".to_owned(),
                ));
            }
            let output = Command::new(DOCKER_BIN)
                .args(stop_args(container, timeout))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| DispatchError::StopFailed(format!("docker stop: {err}")))?;
            if output.status.success() {
                info!(container, "docker stop complete");
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such container") {
                // Already removed; nothing left to stop.
                debug!(container, "docker stop: container already gone");
                return Ok(());
            }
            Err(DispatchError::StopFailed(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr
            )))
        })
    }
}
