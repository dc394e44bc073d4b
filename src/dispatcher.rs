//! Dispatcher — resolves a pod, builds its image, and constructs a session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::event::Event;
use crate::pod::{self, PodConfig};
use crate::runner::{RunOptions, Runner};
use crate::session::{RunFn, Session};
use crate::{DispatchError, Result};

/// Agent binary executed inside the container.
const AGENT_BIN: &str = "claude";

/// Coordinates pod discovery, image building, and container lifecycle.
///
/// The dispatcher is stateless — it does not track running sessions. Each
/// returned [`Session`] is self-contained and the caller is responsible
/// for calling [`Session::stop`] or [`Session::wait`].
pub struct Dispatcher {
    pods_dir: PathBuf,
    runner: Arc<dyn Runner>,
}

impl Dispatcher {
    /// Create a dispatcher discovering pods from `pods_dir` and executing
    /// container operations via `runner`.
    #[must_use]
    pub fn new(pods_dir: impl Into<PathBuf>, runner: Arc<dyn Runner>) -> Self {
        Self {
            pods_dir: pods_dir.into(),
            runner,
        }
    }

    /// Build the pod's image synchronously, then return a [`Session`]
    /// wrapping the running container.
    ///
    /// The build completes before `start` returns — on build failure the
    /// error is returned and no session is created. When the pod's
    /// `template.md` is non-empty, its contents are prepended to the issue
    /// directive handed to the agent.
    ///
    /// The session emits `BuildStarted → BuildComplete → ContainerStarted →
    /// Output* → ContainerExited` (or a terminal `Error` on runtime
    /// failure).
    ///
    /// # Errors
    ///
    /// Propagates pod discovery errors and
    /// [`DispatchError::BuildFailed`](crate::DispatchError::BuildFailed)
    /// from the build step.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        pod_name: &str,
        issue_url: &str,
    ) -> Result<Session> {
        let pod = pod::discover(&self.pods_dir, pod_name)?;

        let tag = match pod.config.image {
            Some(ref image) if !image.is_empty() => image.clone(),
            _ => format!("cldpd-{pod_name}"),
        };

        let build_started = Event::build_started(&tag);
        self.runner
            .build(cancel, &tag, &pod.dir, &pod.config.build_args)
            .await?;
        let build_complete = Event::build_complete(&tag);

        let session_id = new_session_id(pod_name);
        // The container is named after the session id so concurrent starts
        // of the same pod never collide. Resume targets the deterministic
        // cldpd-<pod> name instead; the two name spaces stay separate.
        let container = session_id.clone();

        let (env, inherit_env) = resolve_inherit_env(&pod.config);

        let mut prompt = format!("Work on this GitHub issue: {issue_url}");
        if !pod.template.is_empty() {
            prompt = format!("{}\n\n{prompt}", pod.template);
        }

        let opts = RunOptions {
            image: tag,
            name: container.clone(),
            cmd: vec![AGENT_BIN.to_owned(), "-p".to_owned(), prompt],
            env,
            inherit_env,
            workdir: pod.config.workdir.clone(),
            remove: true,
            mounts: pod.config.mounts.clone(),
        };

        let container_started = Event::container_started(&container);

        info!(
            session_id = %session_id,
            container = %container,
            pod = pod_name,
            "starting pod session"
        );

        let runner = Arc::clone(&self.runner);
        let run_cancel = cancel.clone();
        let run_fn: RunFn = Box::new(move |writer| {
            Box::pin(async move { runner.run(&run_cancel, &opts, writer).await })
        });

        let preamble = vec![build_started, build_complete, container_started];
        Ok(Session::spawn(
            session_id,
            container,
            Arc::clone(&self.runner),
            run_fn,
            preamble,
        ))
    }

    /// Return a [`Session`] wrapping a follow-up exec into the pod's
    /// already-running container. No image is built.
    ///
    /// The session emits `ContainerStarted → Output* → ContainerExited`.
    /// When no container named `cldpd-<pod>` is running, the exec fails
    /// with [`DispatchError::SessionNotFound`](crate::DispatchError::SessionNotFound),
    /// which surfaces through the session as a terminal `Error` event and
    /// as [`Session::wait`]'s return error — resume itself does not probe
    /// up-front.
    pub async fn resume(
        &self,
        cancel: &CancellationToken,
        pod_name: &str,
        prompt: &str,
    ) -> Result<Session> {
        let container = format!("cldpd-{pod_name}");
        let cmd = vec![
            AGENT_BIN.to_owned(),
            "--resume".to_owned(),
            "-p".to_owned(),
            prompt.to_owned(),
        ];

        let session_id = new_session_id(pod_name);

        info!(
            session_id = %session_id,
            container = %container,
            pod = pod_name,
            "resuming pod session"
        );

        let runner = Arc::clone(&self.runner);
        let run_cancel = cancel.clone();
        let exec_container = container.clone();
        let run_fn: RunFn = Box::new(move |writer| {
            Box::pin(async move {
                runner
                    .exec(&run_cancel, &exec_container, &cmd, writer)
                    .await
            })
        });

        let preamble = vec![Event::container_started(&container)];
        Ok(Session::spawn(
            session_id,
            container,
            Arc::clone(&self.runner),
            run_fn,
            preamble,
        ))
    }
}

/// The conventional pods directory: `~/.cldpd/pods`.
///
/// # Errors
///
/// Returns [`DispatchError::Config`] if the home directory cannot be
/// resolved.
pub fn default_pods_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".cldpd").join("pods"))
        .ok_or_else(|| DispatchError::Config("cannot resolve home directory".to_owned()))
}

/// Generate a unique session id in the format `<podName>-<hex8>`.
fn new_session_id(pod_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{pod_name}-{}", &suffix[..8])
}

/// Split configured inherit-env names into eager and deferred halves.
///
/// Names whose host value is non-empty are resolved into the env map and
/// reach the container as literal `-e K=V`. Names absent from the host (or
/// set to the empty string) stay on the inherit list and are emitted as
/// bare `-e NAME` so the runtime inherits them at spawn time.
fn resolve_inherit_env(config: &PodConfig) -> (HashMap<String, String>, Vec<String>) {
    let mut env = config.env.clone();
    let mut inherit = Vec::new();
    for name in &config.inherit_env {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => {
                env.insert(name.clone(), value);
            }
            _ => inherit.push(name.clone()),
        }
    }
    (env, inherit)
}
