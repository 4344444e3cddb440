use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// A published artifact in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key the entry was published under
    pub key: String,
    /// Absolute path of the artifact
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp (publish time, unless touched since)
    pub modified: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self { key: key.into(), path: path.into(), size, modified }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Outcome of a cache lookup. I/O failures are reported separately through
/// the surrounding `Result`, so a `Miss` always means "safe to produce".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(CacheEntry),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Miss => None,
        }
    }
}
