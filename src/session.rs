//! Session lifecycle core.
//!
//! A [`Session`] owns one container invocation and multiplexes it into a
//! typed event stream. Two tasks cooperate around an in-memory byte pipe:
//!
//! 1. The container task drives the run thunk, commits the exit code and
//!    error under a mutex, then drops the pipe writer.
//! 2. The event task reads lines from the pipe, emits `Output` events with
//!    non-blocking sends, and on EOF snapshots the committed exit state,
//!    fires the done latch, attempts the terminal event, and closes the
//!    stream.
//!
//! The done latch fires *before* the terminal event is sent, so
//! [`Session::wait`] never blocks on a full event buffer that nobody is
//! draining. The terminal event is best-effort; stream closure is the
//! authoritative terminal signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::OutputCodec;
use crate::event::{Event, EventStream};
use crate::runner::Runner;
use crate::{DispatchError, Result};

/// Default timeout passed to [`Runner::stop`] by [`Session::stop`].
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the event queue. Lifecycle events are emitted while the
/// buffer cannot be full; output events may be dropped under sustained
/// backpressure.
const EVENT_BUFFER: usize = 256;

/// Capacity of the in-memory pipe between the container task and the event
/// task. A full pipe applies backpressure to the container's stdout copy.
const PIPE_CAPACITY: usize = 65_536;

/// Boxed future produced by a [`RunFn`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>>;

/// The container invocation thunk.
///
/// Receives the write end of the session's pipe, writes the child's stdout
/// into it, and resolves to the child's exit code — or an error for spawn
/// and transport failures. The session owns the writer; the thunk only
/// borrows it, so the pipe is closed strictly after the exit state has been
/// committed.
pub type RunFn = Box<dyn for<'a> FnOnce(&'a mut DuplexStream) -> RunFuture<'a> + Send>;

/// Exit state committed by the container task before the pipe closes.
#[derive(Debug, Default)]
struct ExitState {
    code: i32,
    error: Option<DispatchError>,
}

/// An active pod lifecycle.
///
/// Returned by [`Dispatcher::start`](crate::Dispatcher::start) and
/// [`Dispatcher::resume`](crate::Dispatcher::resume). The caller owns the
/// session and is responsible for calling [`Session::stop`] or
/// [`Session::wait`].
///
/// [`Session::events`] and [`Session::wait`] are independent consumption
/// paths — neither requires the other. [`Session::stop`] is idempotent.
pub struct Session {
    id: String,
    container: String,
    runner: Arc<dyn Runner>,
    events: std::sync::Mutex<Option<mpsc::Receiver<Event>>>,
    done: CancellationToken,
    exit: Arc<Mutex<ExitState>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("done", &self.done)
            .field("exit", &self.exit)
            .finish()
    }
}

impl Session {
    /// Construct a session and start its tasks.
    ///
    /// `preamble` lifecycle events are emitted synchronously, in order,
    /// before either task is spawned — the buffer is empty at that point,
    /// so they are never dropped. `run_fn` is then driven on the container
    /// task with the pipe writer.
    #[must_use]
    pub fn spawn(
        id: String,
        container: String,
        runner: Arc<dyn Runner>,
        run_fn: RunFn,
        preamble: Vec<Event>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let done = CancellationToken::new();
        let exit = Arc::new(Mutex::new(ExitState::default()));

        for event in preamble {
            // The buffer cannot be full before the tasks exist; a failure
            // here would mean a preamble longer than the buffer itself.
            if tx.try_send(event).is_err() {
                warn!(session_id = %id, "lifecycle event dropped at construction");
            }
        }

        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);

        // Container task: drive the thunk, commit the result, close the pipe.
        {
            let exit = Arc::clone(&exit);
            let session_id = id.clone();
            tokio::spawn(async move {
                let mut writer = writer;
                let result = run_fn(&mut writer).await;
                // Commit under the mutex before dropping the writer. The
                // event task reads these fields only after observing EOF on
                // the read end, so EOF doubles as the publication barrier:
                // a reader that sees end-of-stream sees committed values.
                {
                    let mut state = exit.lock().await;
                    match result {
                        Ok(code) => state.code = code,
                        Err(err) => {
                            state.code = -1;
                            state.error = Some(err);
                        }
                    }
                }
                debug!(session_id = %session_id, "container task finished");
                drop(writer);
            });
        }

        // Event task: stream output lines, then publish termination.
        {
            let exit = Arc::clone(&exit);
            let done = done.clone();
            let session_id = id.clone();
            tokio::spawn(async move {
                let mut frames = FramedRead::new(reader, OutputCodec::new());
                while let Some(item) = frames.next().await {
                    match item {
                        Ok(line) => {
                            // Non-blocking send: a full buffer drops this
                            // line rather than stalling the event task.
                            let _ = tx.try_send(Event::output(line));
                        }
                        Err(err) => {
                            // Overlong line or pipe failure. Output capture
                            // ends here; the terminal path still runs.
                            warn!(session_id = %session_id, %err, "output capture stopped");
                            break;
                        }
                    }
                }
                // Release the read end before publishing termination.
                drop(frames);

                let (code, error) = {
                    let state = exit.lock().await;
                    (state.code, state.error.clone())
                };

                // Unblock Wait before attempting the terminal send. A full
                // event buffer must never hold up termination.
                done.cancel();

                let terminal = match error {
                    Some(err) => Event::error(err.to_string()),
                    None => Event::container_exited(code),
                };
                let _ = tx.try_send(terminal);

                // Dropping the sender closes the stream — the authoritative
                // terminal signal even when the terminal event was dropped.
                drop(tx);
                debug!(session_id = %session_id, "event stream closed");
            });
        }

        Self {
            id,
            container,
            runner,
            events: std::sync::Mutex::new(Some(rx)),
            done,
            exit,
        }
    }

    /// The unique session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the session's event stream.
    ///
    /// The first caller receives the stream; subsequent calls return
    /// `None`. Consuming the stream is optional — [`Session::wait`] returns
    /// as soon as the container exits regardless. Under high output volume
    /// output events may be dropped, and the terminal event may be dropped
    /// too; the stream is always closed as the definitive terminal signal.
    pub fn events(&self) -> Option<EventStream> {
        self.events.lock().ok()?.take().map(EventStream::new)
    }

    /// Block until the container exits and return its exit code.
    ///
    /// A non-zero exit code is returned as `Ok(code)` — it is not itself an
    /// error. `Err` carries spawn and transport failures (exit code −1).
    ///
    /// Independent of [`Session::events`]: the stream does not need to be
    /// drained for `wait` to return.
    ///
    /// # Errors
    ///
    /// Returns the committed session error when the run thunk failed.
    pub async fn wait(&self) -> Result<i32> {
        self.done.cancelled().await;
        let state = self.exit.lock().await;
        match &state.error {
            Some(err) => Err(err.clone()),
            None => Ok(state.code),
        }
    }

    /// Initiate graceful shutdown of the container.
    ///
    /// Calls [`Runner::stop`] with a ten-second termination timeout, then
    /// blocks until the session terminates or `cancel` fires, whichever
    /// comes first. Idempotent: on an already-terminated session this
    /// returns `Ok(())` immediately without touching the runner.
    ///
    /// # Errors
    ///
    /// Returns the runner's stop error wrapped with the session id, or
    /// [`DispatchError::Cancelled`] if `cancel` fires before the session
    /// terminates — the session may still terminate on its own later.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        if self.done.is_cancelled() {
            return Ok(());
        }

        self.runner
            .stop(cancel, &self.container, SESSION_STOP_TIMEOUT)
            .await
            .map_err(|err| err.context(format!("stop session {}", self.id)))?;

        tokio::select! {
            () = self.done.cancelled() => Ok(()),
            () = cancel.cancelled() => Err(DispatchError::Cancelled(format!(
                "stop session {}: wait interrupted",
                self.id
            ))),
        }
    }
}
