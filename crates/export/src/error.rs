//! Export Error Types
//!
//! Every failure of an export names the artifact and the strategy that was
//! used, so a caller can decide whether to retry the whole call. Failures
//! reported by the provider carry its raw payload.

use derive_more::{Display, Error};
use std::path::PathBuf;
use std::time::Duration;
use terracache_remote::ExportStrategy;
use terracache_remote::error::ErrorKind as RemoteKind;

/// An export error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ErrorKind {
    /// The provider rejected the export job.
    #[display("{name} ({strategy}): export rejected: {payload}")]
    Submission { name: String, strategy: ExportStrategy, payload: String },
    /// The job ended in a failed state, or its status could not be read.
    #[display("{name} ({strategy}): job failed: {payload}")]
    PollFailure { name: String, strategy: ExportStrategy, payload: String },
    /// The job reported success but left no artifact where expected.
    #[display("{name} ({strategy}): artifact not found at {}", path.display())]
    ArtifactNotFound { name: String, strategy: ExportStrategy, path: PathBuf },
    /// Async-job export needs the shared mount, and it isn't active.
    #[display("{name} ({strategy}): shared mount not active, finished job could not be retrieved")]
    PublishUnavailable { name: String, strategy: ExportStrategy },
    /// Download, stream or archive failure.
    #[display("{name} ({strategy}): transfer failed: {payload}")]
    Transfer { name: String, strategy: ExportStrategy, payload: String },
    /// The caller gave up. Any submitted remote job keeps running.
    #[display("{name} ({strategy}): export cancelled")]
    Cancelled { name: String, strategy: ExportStrategy },
    /// The job didn't finish in time. It keeps running remotely.
    #[display("{name} ({strategy}): job not finished after {}s", deadline.as_secs())]
    DeadlineExceeded { name: String, strategy: ExportStrategy, deadline: Duration },
    /// The cache store couldn't be read or written.
    #[display("cache store error: {_0}")]
    Storage(#[error(not(source))] String),
    /// Configuration or provider settings are unusable.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying the export might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transfer { .. } | Self::DeadlineExceeded { .. })
    }

    /// Translate a provider-side failure for `name`.
    pub(crate) fn from_remote(kind: &RemoteKind, name: &str, strategy: ExportStrategy) -> Self {
        let name = name.to_string();
        match kind {
            RemoteKind::Submission(payload) => Self::Submission { name, strategy, payload: payload.clone() },
            RemoteKind::JobFailed { payload, .. } => Self::PollFailure { name, strategy, payload: payload.clone() },
            RemoteKind::Status(payload) => Self::PollFailure { name, strategy, payload: payload.clone() },
            RemoteKind::ArtifactNotFound(path) => Self::ArtifactNotFound { name, strategy, path: path.clone() },
            RemoteKind::Transfer(payload) | RemoteKind::InvalidResponse(payload) => {
                Self::Transfer { name, strategy, payload: payload.clone() }
            },
            RemoteKind::Cancelled(_) => Self::Cancelled { name, strategy },
            RemoteKind::DeadlineExceeded { deadline, .. } => Self::DeadlineExceeded { name, strategy, deadline: *deadline },
            RemoteKind::Config(message) => Self::Config(message.clone()),
        }
    }
}
