//! Cache root resolution.

use crate::error::{ErrorKind, Result};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use terracache_config::CacheConfig;

/// The directory the cache lives in, chosen once per process.
///
/// When the configured shared mount exists the cache lives under it and
/// [`mount`](Self::mount) reports it; otherwise the local directory is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoot {
    path: PathBuf,
    mount: Option<PathBuf>,
}

impl CacheRoot {
    /// Pick the shared mount or the local fallback, creating the chosen
    /// directory if it is missing.
    ///
    /// A configured mount that isn't an existing directory is treated as
    /// absent (the drive wasn't mounted), not as an error.
    pub fn resolve(config: &CacheConfig) -> Result<Self> {
        let root = match &config.shared_mount {
            Some(mount) if mount.is_dir() => {
                tracing::info!(mount = %mount.display(), "shared mount is active");
                Self { path: mount.join(&config.shared_dir), mount: Some(mount.clone()) }
            },
            Some(mount) => {
                tracing::warn!(mount = %mount.display(), "shared mount unavailable, using local cache");
                Self { path: config.local_dir.clone(), mount: None }
            },
            None => Self { path: config.local_dir.clone(), mount: None },
        };
        ensure_dir(&root.path)?;
        tracing::debug!(root = %root.path.display(), "resolved cache root");
        Ok(root)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active shared mount, if any.
    pub fn mount(&self) -> Option<&Path> {
        self.mount.as_deref()
    }

    pub fn is_shared(&self) -> bool {
        self.mount.is_some()
    }
}

/// Create `path` (and parents) if missing. Must be absolute.
pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        exn::bail!(ErrorKind::InvalidRoot(path.to_path_buf()));
    }
    if path.exists() {
        if !path.is_dir() {
            exn::bail!(ErrorKind::InvalidRoot(path.to_path_buf()));
        }
        return Ok(());
    }
    // Non-async on purpose: runs once when the store is built.
    sync_create_dir(path).map_err(|e| ErrorKind::from_io(e, path))?;
    Ok(())
}
