//! Materialising a finished artifact as a local file.

use crate::error::{ErrorKind, Result};
use crate::job::{JobHandle, JobStatus};
use crate::provider::{ExportProvider, ProviderHandle};
use exn::ResultExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Component, Path, PathBuf};
use terracache_compress::Compression;
use terracache_config::StrategyChoice;
use terracache_descriptor::ArtifactDescriptor;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const PAYLOAD: &str = "payload.part";
const EXTRACTED: &str = "extracted";

/// How a cache miss is turned into a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportStrategy {
    /// Submit a job that writes to the shared mount, wait, then relocate.
    AsyncJob,
    /// Ask for a signed URL and stream the artifact straight down.
    DirectDownload,
}

impl ExportStrategy {
    /// `Auto` means async jobs when the shared mount is active.
    pub fn resolve(choice: StrategyChoice, mount_active: bool) -> Self {
        match choice {
            StrategyChoice::AsyncJob => ExportStrategy::AsyncJob,
            StrategyChoice::DirectDownload => ExportStrategy::DirectDownload,
            StrategyChoice::Auto if mount_active => ExportStrategy::AsyncJob,
            StrategyChoice::Auto => ExportStrategy::DirectDownload,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStrategy::AsyncJob => "async-job",
            ExportStrategy::DirectDownload => "direct-download",
        }
    }
}

impl Display for ExportStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Stateless wrapper around a provider; every call stands alone.
#[derive(Clone)]
pub struct ExportClient {
    provider: ProviderHandle,
}

impl ExportClient {
    pub fn new(provider: ProviderHandle) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn ExportProvider {
        self.provider.as_ref()
    }

    /// Submit `descriptor`, asking the provider to write its output as
    /// `{output}.{ext}` so exports sharing a logical name don't collide.
    #[tracing::instrument(skip_all, fields(name = descriptor.name(), provider = self.provider.name()))]
    pub async fn submit(&self, descriptor: &ArtifactDescriptor, output: &str) -> Result<JobHandle> {
        let job = self.provider.submit(descriptor, output).await?;
        tracing::info!(job = %job.id, output, "submitted export job");
        Ok(job)
    }

    /// Find the file a completed job wrote under `mount`.
    ///
    /// Uses the provider-reported destination when there is one, otherwise
    /// `{mount}/{folder}/{file_name}`.
    pub async fn locate(mount: &Path, folder: &str, status: &JobStatus, file_name: &str) -> Result<PathBuf> {
        let path = match &status.destination {
            Some(destination) => within(mount, Path::new(destination))?,
            None => mount.join(folder).join(file_name),
        };
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => exn::bail!(ErrorKind::ArtifactNotFound(path)),
        }
    }

    /// Download the artifact for `descriptor` into `dir` as it arrives and
    /// return the path of the still-packed payload.
    #[tracing::instrument(skip_all, fields(name = descriptor.name(), dir = %dir.display()))]
    pub async fn fetch(&self, descriptor: &ArtifactDescriptor, dir: &Path) -> Result<PathBuf> {
        let url = self.provider.request_direct_download(descriptor).await?;
        let payload = dir.join(PAYLOAD);
        let bytes = self.stream_to(&url, &payload).await?;
        tracing::debug!(bytes, "download finished");
        Ok(payload)
    }

    /// Turn a fetched payload into the raster's path, unpacking it next to
    /// the payload if it is an archive.
    ///
    /// The raster is `{name}.{extension}` from the archive when present;
    /// otherwise the first extracted file whose name contains the logical
    /// name. Runs to completion once started: extraction happens on the
    /// blocking pool and can't be interrupted.
    #[tracing::instrument(skip_all, fields(name = descriptor.name(), payload = %payload.display()))]
    pub async fn unpack(descriptor: &ArtifactDescriptor, payload: &Path, extension: &str) -> Result<PathBuf> {
        let dir = payload.parent().unwrap_or(Path::new("."));
        let sniffed = payload.to_path_buf();
        let format = tokio::task::spawn_blocking(move || Compression::sniff(&sniffed))
            .await
            .or_raise(|| ErrorKind::Transfer("format detection panicked".to_string()))?
            .or_raise(|| ErrorKind::Transfer("could not read downloaded payload".to_string()))?;

        let target = format!("{}.{extension}", descriptor.name());
        let archive = dir.join(format!("{target}{}", format.extension()));
        fs::rename(payload, &archive).await.or_raise(|| ErrorKind::Transfer("could not stage payload".to_string()))?;
        if !format.is_archive() {
            return Ok(archive);
        }

        let extracted = dir.join(EXTRACTED);
        let files = tokio::task::spawn_blocking(move || format.extract(&archive, &extracted))
            .await
            .or_raise(|| ErrorKind::Transfer("extraction panicked".to_string()))?
            .or_raise(|| ErrorKind::Transfer(format!("could not unpack {format} archive")))?;
        pick(files, &target, descriptor.name())
    }

    async fn stream_to(&self, url: &url::Url, path: &Path) -> Result<u64> {
        let mut stream = self.provider.download(url).await?;
        let mut file = fs::File::create(path).await.or_raise(|| ErrorKind::Transfer("could not create payload file".to_string()))?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.or_raise(|| ErrorKind::Transfer("could not write payload".to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.or_raise(|| ErrorKind::Transfer("could not flush payload".to_string()))?;
        Ok(written)
    }
}

/// Prefer an exact `target` match, then any file mentioning `name`.
fn pick(mut files: Vec<PathBuf>, target: &str, name: &str) -> Result<PathBuf> {
    files.sort();
    if let Some(exact) = files.iter().find(|path| file_name(path) == Some(target)) {
        return Ok(exact.clone());
    }
    match files.iter().find(|path| file_name(path).is_some_and(|n| n.contains(name))) {
        Some(found) => {
            tracing::warn!(file = %found.display(), expected = target, "archive has no exact match, using closest file");
            Ok(found.clone())
        },
        None => exn::bail!(ErrorKind::Transfer(format!("archive contains no file matching {name:?}"))),
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Resolve a provider-reported `destination` under `mount`, refusing
/// anything that would leave it.
fn within(mount: &Path, destination: &Path) -> Result<PathBuf> {
    let relative = match destination.strip_prefix(mount) {
        Ok(relative) => relative,
        Err(_) if destination.is_absolute() => {
            exn::bail!(ErrorKind::InvalidResponse(format!("destination {} is outside the mount", destination.display())))
        },
        Err(_) => destination,
    };
    let mut resolved = mount.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {},
            _ => exn::bail!(ErrorKind::InvalidResponse(format!("destination {} is not a plain path", destination.display()))),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::mock::MockProvider;
    use flate2::write::GzEncoder;
    use rstest::rstest;
    use std::io::{Cursor, Write};
    use std::sync::Arc;
    use terracache_descriptor::BoundingBox;
    use zip::write::{SimpleFileOptions, ZipWriter};

    fn descriptor(name: &str) -> ArtifactDescriptor {
        ArtifactDescriptor::new(name, BoundingBox::new(-74.9, 3.7, -71.9, 7.1), 250.0, "EPSG:4326").unwrap()
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    async fn download_into(client: &ExportClient, descriptor: &ArtifactDescriptor, dir: &Path) -> Result<PathBuf> {
        let payload = client.fetch(descriptor, dir).await?;
        ExportClient::unpack(descriptor, &payload, "tif").await
    }

    fn client(provider: MockProvider) -> (Arc<MockProvider>, ExportClient) {
        let provider = Arc::new(provider);
        (provider.clone(), ExportClient::new(provider))
    }

    #[rstest]
    #[case(StrategyChoice::Auto, true, ExportStrategy::AsyncJob)]
    #[case(StrategyChoice::Auto, false, ExportStrategy::DirectDownload)]
    #[case(StrategyChoice::AsyncJob, false, ExportStrategy::AsyncJob)]
    #[case(StrategyChoice::DirectDownload, true, ExportStrategy::DirectDownload)]
    fn test_resolve_strategy(#[case] choice: StrategyChoice, #[case] mount: bool, #[case] expected: ExportStrategy) {
        assert_eq!(ExportStrategy::resolve(choice, mount), expected);
    }

    #[tokio::test]
    async fn test_download_raw_raster() {
        let dir = tempfile::tempdir().unwrap();
        let (_, client) = client(MockProvider::new().with_download(b"II*\0raster".to_vec()));
        let path = download_into(&client, &descriptor("NDVI_2023"), dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("NDVI_2023.tif"));
        assert_eq!(std::fs::read(&path).unwrap(), b"II*\0raster");
        assert!(!dir.path().join(PAYLOAD).exists());
    }

    #[tokio::test]
    async fn test_download_zip_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let body = zip_bytes(&[("NDVI_2023.tif", b"exact"), ("NDVI_2023.NDVI.tif", b"band")]);
        let (_, client) = client(MockProvider::new().with_download(body));
        let path = download_into(&client, &descriptor("NDVI_2023"), dir.path()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"exact");
    }

    #[tokio::test]
    async fn test_download_zip_name_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        let body = zip_bytes(&[("readme.txt", b"hi"), ("download.LST_2023.LST_Day_1km.tif", b"band")]);
        let (_, client) = client(MockProvider::new().with_download(body));
        let path = download_into(&client, &descriptor("LST_2023"), dir.path()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"band");
    }

    #[tokio::test]
    async fn test_download_zip_without_match() {
        let dir = tempfile::tempdir().unwrap();
        let body = zip_bytes(&[("readme.txt", b"hi")]);
        let (_, client) = client(MockProvider::new().with_download(body));
        let err = download_into(&client, &descriptor("LST_2023"), dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer(_)));
    }

    #[tokio::test]
    async fn test_download_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"II*\0raster").unwrap();
        let (_, client) = client(MockProvider::new().with_download(encoder.finish().unwrap()));
        let path = download_into(&client, &descriptor("NDVI_2023"), dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join(EXTRACTED).join("NDVI_2023.tif"));
        assert_eq!(std::fs::read(path).unwrap(), b"II*\0raster");
    }

    #[tokio::test]
    async fn test_download_fails_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (_, client) =
            client(MockProvider::new().with_download(b"II*\0raster-body".to_vec()).with_download_failure_after(8));
        let err = download_into(&client, &descriptor("NDVI_2023"), dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer(_)));
        assert!(!dir.path().join("NDVI_2023.tif").exists());
    }

    #[tokio::test]
    async fn test_download_url_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, client) = client(MockProvider::new().with_download_error("HTTP 403"));
        let err = download_into(&client, &descriptor("NDVI_2023"), dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer(m) if m == "HTTP 403"));
        assert_eq!(provider.download_requests(), 1);
    }

    #[tokio::test]
    async fn test_locate_default_location() {
        let mount = tempfile::tempdir().unwrap();
        std::fs::create_dir(mount.path().join("exports")).unwrap();
        std::fs::write(mount.path().join("exports/NDVI_2023.tif"), b"x").unwrap();

        let status = JobStatus::new(JobState::Completed);
        let path = ExportClient::locate(mount.path(), "exports", &status, "NDVI_2023.tif").await.unwrap();
        assert_eq!(path, mount.path().join("exports/NDVI_2023.tif"));
    }

    #[tokio::test]
    async fn test_locate_reported_destination() {
        let mount = tempfile::tempdir().unwrap();
        std::fs::create_dir(mount.path().join("elsewhere")).unwrap();
        std::fs::write(mount.path().join("elsewhere/out.tif"), b"x").unwrap();

        let status = JobStatus::new(JobState::Completed).with_destination("elsewhere/out.tif");
        let path = ExportClient::locate(mount.path(), "exports", &status, "NDVI_2023.tif").await.unwrap();
        assert_eq!(path, mount.path().join("elsewhere/out.tif"));
    }

    #[tokio::test]
    async fn test_locate_missing_artifact() {
        let mount = tempfile::tempdir().unwrap();
        let status = JobStatus::new(JobState::Completed);
        let err = ExportClient::locate(mount.path(), "exports", &status, "NDVI_2023.tif").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ArtifactNotFound(p) if p.ends_with("exports/NDVI_2023.tif")));
    }

    #[rstest]
    #[case("../outside.tif")]
    #[case("/etc/passwd")]
    fn test_destination_must_stay_in_mount(#[case] destination: &str) {
        let err = within(Path::new("/mnt/drive"), Path::new(destination)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidResponse(_)));
    }

    #[test]
    fn test_absolute_destination_inside_mount() {
        let path = within(Path::new("/mnt/drive"), Path::new("/mnt/drive/exports/a.tif")).unwrap();
        assert_eq!(path, Path::new("/mnt/drive/exports/a.tif"));
    }
}
