//! Typed session events and the bounded event stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Identifies the kind of event emitted by a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The Docker image build began. `data` contains the image tag.
    BuildStarted,
    /// The Docker image build succeeded. `data` contains the image tag.
    BuildComplete,
    /// The container began running. `data` contains the container name.
    ContainerStarted,
    /// One line of container stdout. `data` contains the line content.
    Output,
    /// The container exited normally. `code` contains its exit code.
    ContainerExited,
    /// A fatal error terminated the session. `data` contains the message.
    Error,
}

/// A lifecycle or output event emitted by a [`Session`](crate::Session).
///
/// Temporal ordering guarantees:
///
/// - Successful start: `BuildStarted → BuildComplete → ContainerStarted →
///   Output* → ContainerExited`
/// - Build failure: `Dispatcher::start` returns the error; no session and
///   no events exist.
/// - Runtime failure: events up to `ContainerStarted`, then `Output*`,
///   then `Error`.
///
/// After the terminal event (`ContainerExited` or `Error`) the stream is
/// closed. Under backpressure the terminal event may be dropped; stream
/// closure is the authoritative terminal signal either way.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Discriminates the event payload.
    pub kind: EventKind,
    /// Image tag, container name, output line, or error message.
    pub data: String,
    /// Child process exit code; meaningful only for `ContainerExited`.
    pub code: i32,
    /// When the event was produced.
    pub time: DateTime<Utc>,
}

impl Event {
    fn new(kind: EventKind, data: String, code: i32) -> Self {
        Self {
            kind,
            data,
            code,
            time: Utc::now(),
        }
    }

    /// Image build started for `tag`.
    #[must_use]
    pub fn build_started(tag: &str) -> Self {
        Self::new(EventKind::BuildStarted, tag.to_owned(), 0)
    }

    /// Image build succeeded for `tag`.
    #[must_use]
    pub fn build_complete(tag: &str) -> Self {
        Self::new(EventKind::BuildComplete, tag.to_owned(), 0)
    }

    /// Container `container` began running.
    #[must_use]
    pub fn container_started(container: &str) -> Self {
        Self::new(EventKind::ContainerStarted, container.to_owned(), 0)
    }

    /// One line of container stdout.
    #[must_use]
    pub fn output(line: String) -> Self {
        Self::new(EventKind::Output, line, 0)
    }

    /// Container exited with `code`.
    #[must_use]
    pub fn container_exited(code: i32) -> Self {
        Self::new(EventKind::ContainerExited, String::new(), code)
    }

    /// Fatal session error described by `message`.
    #[must_use]
    pub fn error(message: String) -> Self {
        Self::new(EventKind::Error, message, 0)
    }
}

/// Receiving end of a session's bounded event queue.
///
/// Exactly one producer (the session's event task) feeds the queue; the
/// stream hands events out in FIFO order until it is closed after the
/// terminal event has been emitted (or dropped under backpressure).
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Receive the next event, or `None` once the stream is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
