//! The compute provider capability.
//!
//! Everything the exporter needs from the remote service is behind
//! [`ExportProvider`]: submit a job, observe it, or ask for a direct download
//! of the finished raster and stream it. [`HttpProvider`](crate::HttpProvider)
//! talks to the real service; `MockProvider` (feature `mock`) scripts it for
//! tests.

use crate::error::Result;
use crate::job::{JobHandle, JobStatus};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use terracache_descriptor::ArtifactDescriptor;
use url::Url;

/// Body of a download, chunk by chunk. A failed chunk ends the transfer.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub type ProviderHandle = Arc<dyn ExportProvider>;

/// Remote raster export capability.
///
/// Calls are independent; implementations keep no per-job state that the
/// caller relies on.
#[async_trait]
pub trait ExportProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Submit an export job that writes the artifact to provider-managed
    /// storage (the shared mount) as `{output}.{ext}`. The returned handle's
    /// `name` is `output`.
    ///
    /// # Errors
    /// [`Submission`](crate::error::ErrorKind::Submission) when the provider
    /// rejects the job.
    async fn submit(&self, descriptor: &ArtifactDescriptor, output: &str) -> Result<JobHandle>;

    /// Observe a submitted job.
    async fn status(&self, job: &JobHandle) -> Result<JobStatus>;

    /// Compute the artifact synchronously and return a time-limited URL for it.
    ///
    /// # Errors
    /// [`Transfer`](crate::error::ErrorKind::Transfer) when the provider
    /// refuses.
    async fn request_direct_download(&self, descriptor: &ArtifactDescriptor) -> Result<Url>;

    /// Start streaming the body behind `url`. Single attempt, no timeout.
    async fn download(&self, url: &Url) -> Result<ByteStream>;
}
