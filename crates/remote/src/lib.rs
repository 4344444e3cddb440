//! Remote export client for terracache.
//!
//! The provider computes rasters; this crate submits work to it, waits for
//! jobs with [`CompletionWaiter`] and turns finished artifacts into local
//! files with [`ExportClient`]. Nothing here touches the cache: callers pass
//! in the directory to materialise into.

mod client;
pub mod error;
mod http;
mod job;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod provider;
mod waiter;

pub use crate::client::{ExportClient, ExportStrategy};
pub use crate::http::HttpProvider;
pub use crate::job::{JobHandle, JobState, JobStatus};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockProvider;
pub use crate::provider::{ByteStream, ExportProvider, ProviderHandle};
pub use crate::waiter::CompletionWaiter;
pub use tokio_util::sync::CancellationToken;
