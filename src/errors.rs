//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared dispatch result type.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatch error enumeration covering all domain failure modes.
///
/// The variant is the classifiable kind: callers match on it to decide how
/// to react, and [`DispatchError::context`] adds caller context without
/// changing it. `Clone` is derived so a committed session error can be
/// handed to every [`Session::wait`](crate::Session::wait) caller.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// Pod directory does not exist.
    PodNotFound(String),
    /// Pod directory exists but contains no Dockerfile.
    InvalidPod(String),
    /// Docker image build exited non-zero or failed to spawn.
    BuildFailed(String),
    /// Exec target container does not exist or is not running.
    SessionNotFound(String),
    /// `docker stop` exited non-zero or failed to spawn.
    StopFailed(String),
    /// Docker daemon cannot be reached.
    DockerUnavailable(String),
    /// Configuration parsing or resolution failure.
    Config(String),
    /// File-system or process plumbing failure.
    Io(String),
    /// Operation interrupted by cancellation.
    Cancelled(String),
}

impl DispatchError {
    /// Prefix the error message with caller context, keeping the variant.
    ///
    /// Wrapping never loses the classifiable kind: a `StopFailed` wrapped
    /// with a session id is still a `StopFailed`.
    #[must_use]
    pub fn context(self, ctx: impl Display) -> Self {
        match self {
            Self::PodNotFound(msg) => Self::PodNotFound(format!("{ctx}: {msg}")),
            Self::InvalidPod(msg) => Self::InvalidPod(format!("{ctx}: {msg}")),
            Self::BuildFailed(msg) => Self::BuildFailed(format!("{ctx}: {msg}")),
            Self::SessionNotFound(msg) => Self::SessionNotFound(format!("{ctx}: {msg}")),
            Self::StopFailed(msg) => Self::StopFailed(format!("{ctx}: {msg}")),
            Self::DockerUnavailable(msg) => Self::DockerUnavailable(format!("{ctx}: {msg}")),
            Self::Config(msg) => Self::Config(format!("{ctx}: {msg}")),
            Self::Io(msg) => Self::Io(format!("{ctx}: {msg}")),
            Self::Cancelled(msg) => Self::Cancelled(format!("{ctx}: {msg}")),
        }
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PodNotFound(msg) => write!(f, "pod not found: {msg}"),
            Self::InvalidPod(msg) => write!(f, "invalid pod: {msg}"),
            Self::BuildFailed(msg) => write!(f, "image build failed: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "no running session: {msg}"),
            Self::StopFailed(msg) => write!(f, "stop failed: {msg}"),
            Self::DockerUnavailable(msg) => write!(f, "docker is not available: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
