//! Remote Error Types

use crate::job::JobState;
use derive_more::{Display, Error};
use std::path::PathBuf;
use std::time::Duration;

/// A remote-provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ErrorKind {
    /// The provider refused the export job. Carries the provider's response.
    #[display("export rejected: {_0}")]
    Submission(#[error(not(source))] String),
    /// A status query failed before the job reached a terminal state.
    #[display("status query failed: {_0}")]
    Status(#[error(not(source))] String),
    /// The job reached a terminal failure state on the provider.
    #[display("job {job} ended {state}: {payload}")]
    JobFailed { job: String, state: JobState, payload: String },
    /// The job completed but its artifact isn't where it should be.
    #[display("artifact not found at {}", _0.display())]
    ArtifactNotFound(#[error(not(source))] PathBuf),
    /// Download URL request, streaming or archive extraction failed.
    #[display("transfer failed: {_0}")]
    Transfer(#[error(not(source))] String),
    /// The provider answered with something we can't interpret.
    #[display("unexpected provider response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    /// The wait was cancelled by the caller. The remote job keeps running.
    #[display("wait for job {_0} cancelled")]
    Cancelled(#[error(not(source))] String),
    /// The wait outlived its deadline. The remote job keeps running.
    #[display("job {job} not finished after {}s", deadline.as_secs())]
    DeadlineExceeded { job: String, deadline: Duration },
    /// Provider settings can't be turned into a client.
    #[display("invalid provider configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying the whole export might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status(_) | Self::Transfer(_) | Self::DeadlineExceeded { .. })
    }
}
