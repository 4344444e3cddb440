//! Scripted provider for testing.

use crate::error::{ErrorKind, Result};
use crate::job::{JobHandle, JobState, JobStatus};
use crate::provider::{ByteStream, ExportProvider};
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use futures::StreamExt;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use terracache_descriptor::ArtifactDescriptor;
use url::Url;

// Bytes per chunk when streaming a scripted download.
const CHUNK: usize = 4;

/// Provider whose answers are scripted up front.
///
/// - Status queries replay the scripted states in order and then repeat the
///   last one. With no script, every job is immediately `Completed`.
/// - With an output directory, the first `Completed` status for a job
///   writes `{dir}/{output}.{ext}`, standing in for the provider writing to
///   the shared mount.
/// - Downloads stream the scripted bytes in small chunks, optionally failing
///   or stalling part-way through.
/// - Submissions can be made to hang forever.
///
/// Every call is counted so tests can assert how much remote work happened.
///
/// # Examples
///
/// ```
/// use terracache_remote::{ExportProvider, JobState, MockProvider};
/// use terracache_descriptor::{ArtifactDescriptor, BoundingBox};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = MockProvider::new().with_states([JobState::Running, JobState::Completed]);
/// let descriptor = ArtifactDescriptor::new("NDVI", BoundingBox::new(0.0, 0.0, 1.0, 1.0), 250.0, "EPSG:4326").unwrap();
/// let job = provider.submit(&descriptor, "NDVI").await.unwrap();
/// assert_eq!(provider.status(&job).await.unwrap().state, JobState::Running);
/// assert_eq!(provider.status(&job).await.unwrap().state, JobState::Completed);
/// assert_eq!(provider.submissions(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockProvider {
    script: Mutex<Script>,
    submissions: AtomicUsize,
    status_calls: AtomicUsize,
    download_requests: AtomicUsize,
}

#[derive(Debug, Default)]
struct Script {
    states: VecDeque<JobStatus>,
    last: Option<JobStatus>,
    submit_error: Option<String>,
    status_error: Option<String>,
    download_error: Option<String>,
    output: Option<(PathBuf, String, Vec<u8>)>,
    written: Vec<String>,
    download: Vec<u8>,
    fail_after: Option<usize>,
    stall: bool,
    hang_submit: bool,
    submitted: Vec<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append job states to the status script.
    pub fn with_states(self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.with_statuses(states.into_iter().map(JobStatus::new))
    }

    pub fn with_statuses(self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.lock().states.extend(statuses);
        self
    }

    /// End the status script with a `Failed` state carrying `message`.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.with_statuses([JobStatus::new(JobState::Failed).with_error(message)])
    }

    pub fn with_submit_error(self, message: impl Into<String>) -> Self {
        self.lock().submit_error = Some(message.into());
        self
    }

    pub fn with_status_error(self, message: impl Into<String>) -> Self {
        self.lock().status_error = Some(message.into());
        self
    }

    /// Make `request_direct_download` fail.
    pub fn with_download_error(self, message: impl Into<String>) -> Self {
        self.lock().download_error = Some(message.into());
        self
    }

    /// Write `{dir}/{name}.{extension}` with `bytes` when a job completes.
    pub fn with_output(self, dir: impl Into<PathBuf>, extension: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.lock().output = Some((dir.into(), extension.into(), bytes.into()));
        self
    }

    /// Body served by `download`.
    pub fn with_download(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.lock().download = bytes.into();
        self
    }

    /// Fail the download stream once `bytes` bytes have been delivered.
    pub fn with_download_failure_after(self, bytes: usize) -> Self {
        self.lock().fail_after = Some(bytes);
        self
    }

    /// Leave the download stream open once the scripted bytes are sent.
    pub fn with_download_stall(self) -> Self {
        self.lock().stall = true;
        self
    }

    /// Count submissions but never answer them.
    pub fn with_hanging_submit(self) -> Self {
        self.lock().hang_submit = true;
        self
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn download_requests(&self) -> usize {
        self.download_requests.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn calls(&self) -> usize {
        self.submissions() + self.status_calls() + self.download_requests()
    }

    /// Output stems submitted so far, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A test that panicked while holding the lock has failed anyway.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_status(script: &mut Script) -> JobStatus {
        if let Some(status) = script.states.pop_front() {
            script.last = Some(status.clone());
            return status;
        }
        script.last.clone().unwrap_or_else(|| JobStatus::new(JobState::Completed))
    }
}

#[async_trait]
impl ExportProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, _descriptor: &ArtifactDescriptor, output: &str) -> Result<JobHandle> {
        let count = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let hang = {
            let mut script = self.lock();
            if let Some(message) = &script.submit_error {
                exn::bail!(ErrorKind::Submission(message.clone()));
            }
            script.submitted.push(output.to_string());
            script.hang_submit
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(JobHandle::new(format!("mock-job-{count}"), output))
    }

    async fn status(&self, job: &JobHandle) -> Result<JobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock();
        let script = &mut *guard;
        if let Some(message) = &script.status_error {
            exn::bail!(ErrorKind::Status(message.clone()));
        }
        let status = Self::next_status(script);
        if status.state == JobState::Completed
            && !script.written.contains(&job.id)
            && let Some((dir, extension, bytes)) = &script.output
        {
            let path = dir.join(format!("{}.{extension}", job.name));
            std::fs::write(&path, bytes).or_raise(|| ErrorKind::Status(format!("mock could not write {}", path.display())))?;
            script.written.push(job.id.clone());
        }
        Ok(status)
    }

    async fn request_direct_download(&self, descriptor: &ArtifactDescriptor) -> Result<Url> {
        self.download_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.lock().download_error {
            exn::bail!(ErrorKind::Transfer(message.clone()));
        }
        let mut url = Url::parse("mock://downloads/").or_raise(|| ErrorKind::Config("mock url".to_string()))?;
        url.set_path(&format!("/downloads/{}", descriptor.name()));
        Ok(url)
    }

    async fn download(&self, _url: &Url) -> Result<ByteStream> {
        let (body, fail_after, stall) = {
            let script = self.lock();
            (script.download.clone(), script.fail_after, script.stall)
        };
        let limit = fail_after.unwrap_or(body.len()).min(body.len());
        let mut chunks: Vec<Result<Bytes>> =
            body[..limit].chunks(CHUNK).map(|chunk| Ok(Bytes::copy_from_slice(chunk))).collect();
        if fail_after.is_some() {
            chunks.push(Err(ErrorKind::Transfer("connection reset by mock".to_string()).into()));
        }
        let stream = futures::stream::iter(chunks);
        if stall {
            return Ok(Box::pin(stream.chain(futures::stream::pending())));
        }
        Ok(Box::pin(stream))
    }
}
