#![forbid(unsafe_code)]

//! `cldpd` — dispatch Claude Code agent pods to Docker containers.
//!
//! ```text
//! cldpd start <pod> --issue <url>
//! cldpd resume <pod> --prompt <text>
//! ```
//!
//! Pods are defined as directories under `~/.cldpd/pods/<name>/` containing
//! a Dockerfile, an optional `pod.json` configuration file, and an optional
//! `template.md` prompt preamble.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use cldpd::dispatcher::default_pods_dir;
use cldpd::{DispatchError, Dispatcher, DockerRunner, EventKind, Result, Runner, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "cldpd",
    about = "Dispatch Claude Code agent pods to Docker containers",
    version,
    long_about = None
)]
struct Cli {
    /// Pods directory. Defaults to `~/.cldpd/pods`.
    #[arg(long)]
    pods_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a pod's image and start an agent container on a GitHub issue.
    Start {
        /// Pod name (directory under the pods dir).
        pod: String,

        /// GitHub issue URL handed to the agent.
        #[arg(long)]
        issue: String,
    },

    /// Send a follow-up prompt to a pod's already-running container.
    Resume {
        /// Pod name (directory under the pods dir).
        pod: String,

        /// Follow-up guidance for the running agent.
        #[arg(long)]
        prompt: String,
    },
}

fn main() {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("cldpd: {err}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("cldpd: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(args));
    std::process::exit(code);
}

async fn run(args: Cli) -> i32 {
    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    match dispatch(&cancel, args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cldpd: {err}");
            1
        }
    }
}

async fn dispatch(cancel: &CancellationToken, args: Cli) -> Result<i32> {
    let pods_dir = match args.pods_dir {
        Some(dir) => dir,
        None => default_pods_dir()?,
    };
    let runner = Arc::new(DockerRunner::new());

    match args.command {
        Command::Start { pod, issue } => {
            runner.preflight(cancel).await?;
            let dispatcher = Dispatcher::new(pods_dir, runner);
            let session = Arc::new(dispatcher.start(cancel, &pod, &issue).await?);
            Ok(consume_session(cancel, session).await)
        }
        Command::Resume { pod, prompt } => {
            let dispatcher = Dispatcher::new(pods_dir, runner);
            let session = Arc::new(dispatcher.resume(cancel, &pod, &prompt).await?);
            Ok(consume_session(cancel, session).await)
        }
    }
}

/// Print session events and return the container's exit code.
///
/// Output event text goes to stdout, error event text to stderr. On
/// interrupt the session is stopped gracefully with a fresh token so the
/// stop itself is not already cancelled.
async fn consume_session(cancel: &CancellationToken, session: Arc<Session>) -> i32 {
    {
        let cancel = cancel.clone();
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Err(err) = session.stop(&CancellationToken::new()).await {
                debug!(%err, "graceful stop after interrupt failed");
            }
        });
    }

    if let Some(mut events) = session.events() {
        while let Some(event) = events.recv().await {
            match event.kind {
                EventKind::Output => println!("{}", event.data),
                EventKind::Error => eprintln!("cldpd: {}", event.data),
                _ => {}
            }
        }
    }

    match session.wait().await {
        Ok(code) => code,
        Err(err) => {
            // The terminal Error event already carried the message to
            // stderr; under backpressure it may have been dropped, so keep
            // a debug trace.
            debug!(%err, "session ended with transport error");
            -1
        }
    }
}

/// Cancel the root token on the first interrupt signal.
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| DispatchError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| DispatchError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
