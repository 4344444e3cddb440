//! The filesystem cache store.
//!
//! The only source of truth for a hit is "a regular file exists at
//! `{root}/{key}.{ext}`". Nothing is ever written at that path directly:
//! artifacts are materialised in a [`Staging`] directory inside the root and
//! renamed into place, so a reader never observes a partial file.

use crate::entry::{CacheEntry, Lookup};
use crate::error::{ErrorKind, Result};
use crate::key::{STAGING_PREFIX, validate as validate_key};
use crate::root::{CacheRoot, ensure_dir};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    extension: String,
}

impl CacheStore {
    /// Create a store rooted at `root` (absolute; created if missing).
    /// `extension` is given without the dot, a leading dot is tolerated.
    pub fn new(root: impl AsRef<Path>, extension: impl AsRef<str>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root)?;
        let extension = extension.as_ref().trim_start_matches('.').to_string();
        Ok(Self { root, extension })
    }

    pub fn from_root(root: &CacheRoot, extension: impl AsRef<str>) -> Result<Self> {
        Self::new(root.path(), extension)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name an artifact is published under, e.g. `NDVI_2023.tif`.
    pub fn file_name(&self, key: &str) -> Result<String> {
        Ok(format!("{}.{}", validate_key(key)?, self.extension))
    }

    /// Deterministic final path for `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(self.file_name(key)?))
    }

    #[tracing::instrument(skip(self))]
    pub async fn lookup(&self, key: &str) -> Result<Lookup> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                let entry = entry_from(key, path, &metadata)?;
                tracing::debug!(path = %entry.path.display(), "cache hit");
                Ok(Lookup::Hit(entry))
            },
            // A directory squatting on the final path is not an artifact.
            Ok(_) => Ok(Lookup::Miss),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Lookup::Miss),
            Err(e) => Err(ErrorKind::from_io(e, path).into()),
        }
    }

    /// A fresh staging directory on the same filesystem as the final paths.
    /// Removed, with whatever is left in it, when dropped.
    pub fn staging(&self) -> Result<Staging> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| ErrorKind::from_io(e, &self.root))?;
        Ok(Staging { dir })
    }

    /// Move the fully written file at `source` into place under `key`.
    ///
    /// A same-filesystem rename is atomic. When `source` is on another
    /// filesystem it is first copied into a staging directory and then
    /// renamed, and the source is removed afterwards.
    #[tracing::instrument(skip(self), fields(source = %source.display()))]
    pub async fn publish(&self, key: &str, source: &Path) -> Result<CacheEntry> {
        let dest = self.path_for(key)?;
        match fs::rename(source, &dest).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                tracing::debug!("source is on another filesystem, copying through staging");
                self.publish_across_devices(source, &dest).await?;
            },
            Err(e) => return Err(ErrorKind::from_io(e, source).into()),
        }
        let metadata = fs::metadata(&dest).await.map_err(|e| ErrorKind::from_io(e, &dest))?;
        let entry = entry_from(key, dest, &metadata)?;
        tracing::info!(path = %entry.path.display(), size = entry.size, "published artifact");
        Ok(entry)
    }

    async fn publish_across_devices(&self, source: &Path, dest: &Path) -> Result<()> {
        let staging = self.staging()?;
        let staged = staging.file("artifact");
        fs::copy(source, &staged).await.map_err(|e| ErrorKind::from_io(e, source))?;
        fs::rename(&staged, dest).await.map_err(|e| ErrorKind::from_io(e, dest))?;
        if let Err(e) = fs::remove_file(source).await {
            // The artifact is already published; a stray source is only clutter.
            tracing::warn!(source = %source.display(), error = %e, "could not remove relocated source");
        }
        Ok(())
    }

    /// Remove the entry for `key`. Returns whether anything was removed.
    #[tracing::instrument(skip(self))]
    pub async fn evict(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "evicted cache entry");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::from_io(e, path).into()),
        }
    }

    /// Every published entry, sorted by key. Staging directories and files
    /// with another extension are ignored.
    pub async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|e| ErrorKind::from_io(e, &self.root))?;
        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|e| ErrorKind::from_io(e, &self.root))? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if validate_key(&key).is_err() {
                continue;
            }
            let metadata = item.metadata().await.map_err(|e| ErrorKind::from_io(e, &path))?;
            if metadata.is_file() {
                entries.push(entry_from(&key, path, &metadata)?);
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn entry_from(key: &str, path: PathBuf, metadata: &Metadata) -> Result<CacheEntry> {
    let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
    Ok(CacheEntry::new(key, path, metadata.len(), modified))
}

/// Scratch directory for materialising one artifact.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a file named `name` inside the staging directory.
    pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }
}
