use crate::error::{ErrorKind, Result};
use crate::job::{JobHandle, JobState, JobStatus};
use crate::provider::ExportProvider;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tokio_util::sync::CancellationToken;

/// Blocks until a submitted job reaches a terminal state.
///
/// Polls once immediately and then every `interval`, with no backoff. The
/// wait ends early on cancellation or when the optional deadline elapses;
/// in both cases the remote job is left running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionWaiter {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Default for CompletionWaiter {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), deadline: None }
    }
}

impl CompletionWaiter {
    pub fn new(interval: Duration, deadline: Option<Duration>) -> Self {
        Self { interval, deadline }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Wait for `job` to finish.
    ///
    /// # Errors
    /// - [`JobFailed`](ErrorKind::JobFailed) when the provider reports
    ///   `Failed` or `Cancelled`, carrying its payload.
    /// - [`Cancelled`](ErrorKind::Cancelled) when `cancel` fires.
    /// - [`DeadlineExceeded`](ErrorKind::DeadlineExceeded) when the deadline
    ///   elapses first.
    /// - Any error from the status query itself.
    #[tracing::instrument(skip_all, fields(job = %job.id, name = %job.name))]
    pub async fn wait(
        &self,
        provider: &dyn ExportProvider,
        job: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<JobStatus> {
        let expires = self.deadline.map(|deadline| Instant::now() + deadline);
        let deadline = async {
            match expires {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!("wait cancelled, remote job left running");
                exn::bail!(ErrorKind::Cancelled(job.id.clone()))
            }

            _ = deadline => {
                tracing::warn!(deadline_secs = self.deadline.map(|d| d.as_secs()), "deadline exceeded, remote job left running");
                exn::bail!(ErrorKind::DeadlineExceeded {
                    job: job.id.clone(),
                    deadline: self.deadline.unwrap_or_default(),
                })
            }

            status = self.poll(provider, job) => status,
        }
    }

    async fn poll(&self, provider: &dyn ExportProvider, job: &JobHandle) -> Result<JobStatus> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u32 = 0;
        loop {
            ticker.tick().await;
            polls += 1;
            let status = provider.status(job).await?;
            tracing::debug!(poll = polls, state = %status.state, "polled job");
            match status.state {
                JobState::Completed => {
                    tracing::info!(polls, "job completed");
                    return Ok(status);
                },
                JobState::Failed | JobState::Cancelled => {
                    exn::bail!(ErrorKind::JobFailed {
                        job: job.id.clone(),
                        state: status.state,
                        payload: status.payload(),
                    })
                },
                JobState::Pending | JobState::Running => {},
            }
        }
    }
}
