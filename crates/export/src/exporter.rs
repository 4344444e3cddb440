use crate::error::{ErrorKind, Result};
use crate::flight::Flights;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use terracache_config::{Config, StrategyChoice};
use terracache_descriptor::{ArtifactDescriptor, CacheKeyPolicy};
use terracache_remote::{CompletionWaiter, ExportClient, ExportStrategy, HttpProvider, ProviderHandle};
use terracache_storage::{CacheEntry, CacheRoot, CacheStore, Lookup};
use tokio_util::sync::CancellationToken;

/// Knobs for [`Exporter::new`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub strategy: StrategyChoice,
    /// Active shared mount. Required by the async-job strategy.
    pub mount: Option<PathBuf>,
    /// Folder under the mount that finished jobs are written to.
    pub export_folder: String,
    pub key_policy: CacheKeyPolicy,
    pub waiter: CompletionWaiter,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            mount: None,
            export_folder: "exports".to_string(),
            key_policy: CacheKeyPolicy::default(),
            waiter: CompletionWaiter::default(),
        }
    }
}

impl ExportOptions {
    pub fn from_config(config: &Config, root: &CacheRoot) -> Self {
        Self {
            strategy: config.export.strategy,
            mount: root.mount().map(Path::to_path_buf),
            export_folder: config.export.export_folder.clone(),
            key_policy: config.cache.key_policy,
            waiter: CompletionWaiter::new(config.export.poll_interval(), config.export.deadline()),
        }
    }
}

/// Turns descriptors into local files, exporting only on a cache miss.
///
/// Concurrent calls for the same cache key share one export: the first
/// caller does the work and the others receive its outcome, success or
/// failure. Only a cancelled export is redone by the next caller in line.
pub struct Exporter {
    store: CacheStore,
    client: ExportClient,
    strategy: ExportStrategy,
    mount: Option<PathBuf>,
    export_folder: String,
    key_policy: CacheKeyPolicy,
    waiter: CompletionWaiter,
    flights: Flights,
}

impl Exporter {
    /// Build an exporter from configuration, talking to the HTTP provider.
    ///
    /// `credentials` is a bearer token and takes precedence over
    /// `provider.token` from the configuration.
    pub fn init(config: &Config, credentials: Option<String>) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config("configuration failed validation".to_string()))?;
        let root = CacheRoot::resolve(&config.cache)
            .or_raise(|| ErrorKind::Storage("could not prepare the cache root".to_string()))?;
        let store = CacheStore::from_root(&root, &config.cache.extension)
            .or_raise(|| ErrorKind::Storage(format!("could not open cache at {}", root.path().display())))?;
        let provider = HttpProvider::from_config(config, credentials)
            .or_raise(|| ErrorKind::Config("could not build the provider client".to_string()))?;
        Ok(Self::new(store, Arc::new(provider), ExportOptions::from_config(config, &root)))
    }

    pub fn new(store: CacheStore, provider: ProviderHandle, options: ExportOptions) -> Self {
        let strategy = ExportStrategy::resolve(options.strategy, options.mount.is_some());
        tracing::info!(
            root = %store.root().display(),
            provider = provider.name(),
            %strategy,
            choice = %options.strategy,
            "exporter ready"
        );
        Self {
            store,
            client: ExportClient::new(provider),
            strategy,
            mount: options.mount,
            export_folder: options.export_folder,
            key_policy: options.key_policy,
            waiter: options.waiter,
            flights: Flights::default(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn strategy(&self) -> ExportStrategy {
        self.strategy
    }

    /// Cache key `descriptor` is published under.
    pub fn key_for(&self, descriptor: &ArtifactDescriptor) -> String {
        descriptor.cache_key(self.key_policy)
    }

    /// Local path of the artifact for `descriptor`, exporting it first if
    /// it isn't cached. Waits as long as the configured deadline allows.
    pub async fn export_if_needed(&self, descriptor: &ArtifactDescriptor) -> Result<PathBuf> {
        self.export_with_cancel(descriptor, CancellationToken::new()).await
    }

    /// Like [`export_if_needed`](Self::export_if_needed), giving up when
    /// `cancel` fires. A remote job that was already submitted is not
    /// cancelled.
    #[tracing::instrument(skip_all, fields(name = descriptor.name(), strategy = %self.strategy))]
    pub async fn export_with_cancel(&self, descriptor: &ArtifactDescriptor, cancel: CancellationToken) -> Result<PathBuf> {
        let key = self.key_for(descriptor);
        if let Some(entry) = self.cached(&key).await? {
            return Ok(entry.into_path());
        }
        // Fail before spending remote compute on a job we can't retrieve.
        if self.strategy == ExportStrategy::AsyncJob && self.mount.is_none() {
            exn::bail!(self.unavailable(descriptor));
        }

        let mut flight = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(self.cancelled(descriptor)),
            flight = self.flights.enter(&key) => flight,
        };
        match flight.outcome() {
            Some(Ok(path)) => {
                tracing::debug!("served by a concurrent export");
                return Ok(path.clone());
            },
            Some(Err(kind)) => {
                tracing::debug!(error = %kind, "concurrent export failed");
                return Err(exn::Exn::from(kind.clone()));
            },
            None => {},
        }
        // First in line, or the previous holder gave up.
        if let Some(entry) = self.cached(&key).await? {
            return Ok(entry.into_path());
        }

        let result = match self.strategy {
            ExportStrategy::AsyncJob => self.via_job(descriptor, &key, &cancel).await,
            ExportStrategy::DirectDownload => self.via_download(descriptor, &key, &cancel).await,
        }
        .map(CacheEntry::into_path);
        match &result {
            Ok(path) => flight.record(Ok(path.clone())),
            Err(err) if !matches!(&**err, ErrorKind::Cancelled { .. }) => flight.record(Err((**err).clone())),
            Err(_) => {},
        }
        result
    }

    async fn cached(&self, key: &str) -> Result<Option<CacheEntry>> {
        let lookup = self.store.lookup(key).await.or_raise(|| ErrorKind::Storage(format!("lookup of {key:?} failed")))?;
        Ok(match lookup {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss => None,
        })
    }

    /// Submit, wait for the job, then move its output off the shared mount.
    async fn via_job(&self, descriptor: &ArtifactDescriptor, key: &str, cancel: &CancellationToken) -> Result<CacheEntry> {
        let Some(mount) = self.mount.as_deref() else {
            exn::bail!(self.unavailable(descriptor));
        };
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("submission abandoned");
                exn::bail!(self.cancelled(descriptor))
            },
            job = self.client.submit(descriptor, key) => self.remote(descriptor, job)?,
        };
        let status = self.remote(descriptor, self.waiter.wait(self.client.provider(), &job, cancel).await)?;

        // Jobs write under the cache key, so same-named exports with
        // different parameters never share an output file.
        let produced = format!("{key}.{}", self.store.extension());
        let source = self.remote(descriptor, ExportClient::locate(mount, &self.export_folder, &status, &produced).await)?;
        self.publish(key, &source).await
    }

    /// Download into a staging directory inside the cache root, then publish.
    async fn via_download(&self, descriptor: &ArtifactDescriptor, key: &str, cancel: &CancellationToken) -> Result<CacheEntry> {
        let staging = self.store.staging().or_raise(|| ErrorKind::Storage("could not create staging directory".to_string()))?;
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("download abandoned");
                exn::bail!(self.cancelled(descriptor))
            },
            payload = self.client.fetch(descriptor, staging.path()) => self.remote(descriptor, payload)?,
        };
        // Not raced against `cancel`: extraction runs on the blocking pool
        // and must finish before `staging` is removed.
        let raster = self.remote(descriptor, ExportClient::unpack(descriptor, &payload, self.store.extension()).await)?;
        self.publish(key, &raster).await
    }

    async fn publish(&self, key: &str, source: &Path) -> Result<CacheEntry> {
        self.store.publish(key, source).await.or_raise(|| ErrorKind::Storage(format!("could not publish {key:?}")))
    }

    fn remote<T>(&self, descriptor: &ArtifactDescriptor, result: terracache_remote::error::Result<T>) -> Result<T> {
        result.or_else(|err| {
            let kind = ErrorKind::from_remote(&err, descriptor.name(), self.strategy);
            Err(err).or_raise(|| kind)
        })
    }

    fn unavailable(&self, descriptor: &ArtifactDescriptor) -> ErrorKind {
        ErrorKind::PublishUnavailable { name: descriptor.name().to_string(), strategy: self.strategy }
    }

    fn cancelled(&self, descriptor: &ArtifactDescriptor) -> ErrorKind {
        ErrorKind::Cancelled { name: descriptor.name().to_string(), strategy: self.strategy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use terracache_config::CacheConfig;
    use terracache_descriptor::BoundingBox;
    use terracache_remote::{JobState, MockProvider};

    const RASTER: &[u8] = b"II*\0fake geotiff body";

    fn ndvi() -> ArtifactDescriptor {
        ArtifactDescriptor::new("NDVI_2023", BoundingBox::new(-74.9, 3.7, -71.9, 7.1), 250.0, "EPSG:4326").unwrap()
    }

    /// A shared mount with the provider's export folder and the cache under it.
    struct Mount {
        dir: TempDir,
        root: CacheRoot,
    }

    impl Mount {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("exports")).unwrap();
            let local = dir.path().join("local");
            let config = CacheConfig { shared_mount: Some(dir.path().to_path_buf()), ..CacheConfig::local(&local) };
            let root = CacheRoot::resolve(&config).unwrap();
            Self { dir, root }
        }

        fn exports(&self) -> PathBuf {
            self.dir.path().join("exports")
        }

        fn exporter(&self, provider: &Arc<MockProvider>) -> Exporter {
            let store = CacheStore::from_root(&self.root, "tif").unwrap();
            let options = ExportOptions {
                mount: self.root.mount().map(Path::to_path_buf),
                waiter: CompletionWaiter::new(Duration::from_secs(30), None),
                ..ExportOptions::default()
            };
            Exporter::new(store, provider.clone(), options)
        }
    }

    fn local_exporter(dir: &TempDir, provider: &Arc<MockProvider>, choice: StrategyChoice) -> Exporter {
        let store = CacheStore::new(dir.path(), "tif").unwrap();
        let options = ExportOptions { strategy: choice, ..ExportOptions::default() };
        Exporter::new(store, provider.clone(), options)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_async_job() {
        let mount = Mount::new();
        let provider = Arc::new(
            MockProvider::new()
                .with_states([JobState::Running, JobState::Running, JobState::Completed])
                .with_output(mount.exports(), "tif", RASTER),
        );
        let exporter = mount.exporter(&provider);
        assert_eq!(exporter.strategy(), ExportStrategy::AsyncJob);

        let path = exporter.export_if_needed(&ndvi()).await.unwrap();
        assert_eq!(path, mount.root.path().join("NDVI_2023.tif"));
        assert_eq!(std::fs::read(&path).unwrap(), RASTER);
        assert_eq!(provider.submissions(), 1);
        assert_eq!(provider.status_calls(), 3);
        // Relocated, not copied.
        assert!(!mount.exports().join("NDVI_2023.tif").exists());

        let calls = provider.calls();
        let again = exporter.export_if_needed(&ndvi()).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(provider.calls(), calls);
    }

    #[tokio::test]
    async fn test_idempotent_direct_download() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER));
        let exporter = local_exporter(&dir, &provider, StrategyChoice::Auto);
        assert_eq!(exporter.strategy(), ExportStrategy::DirectDownload);

        let first = exporter.export_if_needed(&ndvi()).await.unwrap();
        let second = exporter.export_if_needed(&ndvi()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("NDVI_2023.tif"));
        assert_eq!(provider.download_requests(), 1);
        assert_eq!(provider.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_async_job() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new().with_output(mount.exports(), "tif", RASTER));
        let exporter = mount.exporter(&provider);
        exporter.export_if_needed(&ndvi()).await.unwrap();
        exporter.export_if_needed(&ndvi()).await.unwrap();
        assert_eq!(provider.submissions(), 1);
    }

    #[tokio::test]
    async fn test_name_policy_ignores_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER));
        let exporter = local_exporter(&dir, &provider, StrategyChoice::DirectDownload);
        let elsewhere =
            ArtifactDescriptor::new("NDVI_2023", BoundingBox::new(10.0, 10.0, 11.0, 11.0), 30.0, "EPSG:3857").unwrap();

        assert_eq!(exporter.key_for(&ndvi()), exporter.key_for(&elsewhere));
        let first = exporter.export_if_needed(&ndvi()).await.unwrap();
        // Same name, different region: silently served from the same entry.
        let second = exporter.export_if_needed(&elsewhere).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.download_requests(), 1);
    }

    #[tokio::test]
    async fn test_fingerprint_policy_separates_entries() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER));
        let store = CacheStore::new(dir.path(), "tif").unwrap();
        let options = ExportOptions {
            strategy: StrategyChoice::DirectDownload,
            key_policy: CacheKeyPolicy::Fingerprint,
            ..ExportOptions::default()
        };
        let exporter = Exporter::new(store, provider.clone(), options);
        let elsewhere =
            ArtifactDescriptor::new("NDVI_2023", BoundingBox::new(10.0, 10.0, 11.0, 11.0), 30.0, "EPSG:3857").unwrap();

        let first = exporter.export_if_needed(&ndvi()).await.unwrap();
        let second = exporter.export_if_needed(&elsewhere).await.unwrap();
        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_str().unwrap().starts_with("NDVI_2023-"));
        assert_eq!(provider.download_requests(), 2);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER).with_download_failure_after(8));
        let exporter = local_exporter(&dir, &provider, StrategyChoice::DirectDownload);

        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer { name, strategy: ExportStrategy::DirectDownload, .. } if name == "NDVI_2023"));
        assert!(!exporter.store().lookup("NDVI_2023").await.unwrap().is_hit());
        // Staging was cleaned up too.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_export() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER));
        let exporter = local_exporter(&dir, &provider, StrategyChoice::DirectDownload);

        let descriptor = ndvi();
        let (a, b) = tokio::join!(exporter.export_if_needed(&descriptor), exporter.export_if_needed(&descriptor));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.download_requests(), 1);
        assert_eq!(exporter.flights.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_async_jobs_submit_once() {
        let mount = Mount::new();
        let provider = Arc::new(
            MockProvider::new().with_states([JobState::Running, JobState::Completed]).with_output(
                mount.exports(),
                "tif",
                RASTER,
            ),
        );
        let exporter = mount.exporter(&provider);

        let descriptor = ndvi();
        let (a, b) = tokio::join!(exporter.export_if_needed(&descriptor), exporter.export_if_needed(&descriptor));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(provider.submissions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_is_shared() {
        let mount = Mount::new();
        let provider =
            Arc::new(MockProvider::new().with_states([JobState::Running]).with_failure("User memory limit exceeded."));
        let exporter = mount.exporter(&provider);

        let descriptor = ndvi();
        let (a, b) = tokio::join!(exporter.export_if_needed(&descriptor), exporter.export_if_needed(&descriptor));
        for err in [a.unwrap_err(), b.unwrap_err()] {
            assert!(matches!(&*err, ErrorKind::PollFailure { payload, .. } if payload == "User memory limit exceeded."));
        }
        assert_eq!(provider.submissions(), 1);
        assert_eq!(exporter.flights.len(), 0);

        // Once nobody is waiting, a new call is a fresh attempt.
        assert!(exporter.export_if_needed(&descriptor).await.is_err());
        assert_eq!(provider.submissions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_call_takes_over_after_cancellation() {
        let mount = Mount::new();
        let provider = Arc::new(
            MockProvider::new()
                .with_states([JobState::Running, JobState::Running, JobState::Running, JobState::Completed])
                .with_output(mount.exports(), "tif", RASTER),
        );
        let exporter = mount.exporter(&provider);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            trigger.cancel();
        });

        let descriptor = ndvi();
        let (a, b) =
            tokio::join!(exporter.export_with_cancel(&descriptor, cancel), exporter.export_if_needed(&descriptor));
        assert!(matches!(&*a.unwrap_err(), ErrorKind::Cancelled { .. }));
        assert_eq!(b.unwrap(), mount.root.path().join("NDVI_2023.tif"));
        assert_eq!(provider.submissions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fingerprint_jobs_write_separate_outputs() {
        let mount = Mount::new();
        let provider = Arc::new(
            MockProvider::new().with_states([JobState::Running, JobState::Completed]).with_output(
                mount.exports(),
                "tif",
                RASTER,
            ),
        );
        let store = CacheStore::from_root(&mount.root, "tif").unwrap();
        let options = ExportOptions {
            mount: mount.root.mount().map(Path::to_path_buf),
            key_policy: CacheKeyPolicy::Fingerprint,
            waiter: CompletionWaiter::new(Duration::from_secs(30), None),
            ..ExportOptions::default()
        };
        let exporter = Exporter::new(store, provider.clone(), options);
        let here = ndvi();
        let elsewhere =
            ArtifactDescriptor::new("NDVI_2023", BoundingBox::new(10.0, 10.0, 11.0, 11.0), 30.0, "EPSG:3857").unwrap();
        let keys = [exporter.key_for(&here), exporter.key_for(&elsewhere)];

        let (a, b) = tokio::join!(exporter.export_if_needed(&here), exporter.export_if_needed(&elsewhere));
        assert_eq!(a.unwrap(), mount.root.path().join(format!("{}.tif", keys[0])));
        assert_eq!(b.unwrap(), mount.root.path().join(format!("{}.tif", keys[1])));

        let mut submitted = provider.submitted();
        submitted.sort();
        let mut expected = keys.to_vec();
        expected.sort();
        assert_eq!(submitted, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_submission() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new().with_hanging_submit());
        let exporter = mount.exporter(&provider);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = exporter.export_with_cancel(&ndvi(), cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled { .. }));
        assert_eq!(provider.submissions(), 1);
        assert_eq!(provider.status_calls(), 0);
        assert_eq!(exporter.flights.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_download_removes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new().with_download(RASTER).with_download_stall());
        let exporter = local_exporter(&dir, &provider, StrategyChoice::DirectDownload);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = exporter.export_with_cancel(&ndvi(), cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled { strategy: ExportStrategy::DirectDownload, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_is_poll_failure() {
        let mount = Mount::new();
        let provider = Arc::new(
            MockProvider::new()
                .with_states([JobState::Running])
                .with_failure("Computation timed out.")
                .with_output(mount.exports(), "tif", RASTER),
        );
        let exporter = mount.exporter(&provider);

        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        let ErrorKind::PollFailure { name, strategy, payload } = &*err else { panic!("expected poll failure, got {err:?}") };
        assert_eq!(name, "NDVI_2023");
        assert_eq!(*strategy, ExportStrategy::AsyncJob);
        assert_eq!(payload, "Computation timed out.");
        assert!(exporter.store().entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submission_rejected() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new().with_submit_error("HTTP 400: region too large"));
        let exporter = mount.exporter(&provider);
        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Submission { payload, .. } if payload == "HTTP 400: region too large"));
        assert_eq!(provider.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_async_job_without_mount_fails_before_submitting() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockProvider::new());
        let exporter = local_exporter(&dir, &provider, StrategyChoice::AsyncJob);

        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PublishUnavailable { strategy: ExportStrategy::AsyncJob, .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_completed_without_artifact() {
        let mount = Mount::new();
        // Completes, but never writes anything to the mount.
        let provider = Arc::new(MockProvider::new());
        let exporter = mount.exporter(&provider);

        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        let ErrorKind::ArtifactNotFound { path, .. } = &*err else { panic!("expected missing artifact, got {err:?}") };
        assert_eq!(path, &mount.exports().join("NDVI_2023.tif"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new().with_states([JobState::Running]));
        let exporter = mount.exporter(&provider);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            trigger.cancel();
        });

        let err = exporter.export_with_cancel(&ndvi(), cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled { .. }));
        assert_eq!(provider.submissions(), 1);
        assert!(!exporter.store().lookup("NDVI_2023").await.unwrap().is_hit());
        assert_eq!(exporter.flights.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new());
        let exporter = mount.exporter(&provider);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exporter.export_with_cancel(&ndvi(), cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled { .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let mount = Mount::new();
        let provider = Arc::new(MockProvider::new().with_states([JobState::Running]));
        let store = CacheStore::from_root(&mount.root, "tif").unwrap();
        let options = ExportOptions {
            mount: mount.root.mount().map(Path::to_path_buf),
            waiter: CompletionWaiter::new(Duration::from_secs(30), Some(Duration::from_secs(300))),
            ..ExportOptions::default()
        };
        let exporter = Exporter::new(store, provider.clone(), options);

        let err = exporter.export_if_needed(&ndvi()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DeadlineExceeded { deadline, .. } if *deadline == Duration::from_secs(300)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_init_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache = CacheConfig::local(dir.path().join("cache"));
        let exporter = Exporter::init(&config, Some("secret".to_string())).unwrap();
        assert_eq!(exporter.strategy(), ExportStrategy::DirectDownload);
        assert_eq!(exporter.store().root(), dir.path().join("cache"));
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = Config::default();
        config.export.poll_interval = 0;
        let err = Exporter::init(&config, None).err().unwrap();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }
}
