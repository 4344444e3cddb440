use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use terracache_descriptor::CacheKeyPolicy;

/// Top-level configuration, one struct per section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub export: ExportConfig,
    pub provider: ProviderConfig,
}

/// Where cached artifacts live and how they are named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Shared durable mount. When it exists at startup the cache lives
    /// under it and the async-job strategy becomes available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_mount: Option<PathBuf>,
    /// Subdirectory of the shared mount holding the cache.
    pub shared_dir: String,
    /// Fallback cache directory when no shared mount is available.
    pub local_dir: PathBuf,
    /// Extension of published artifacts, without the dot.
    pub extension: String,
    pub key_policy: CacheKeyPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shared_mount: None,
            shared_dir: "terracache".to_string(),
            local_dir: std::env::temp_dir().join("terracache"),
            extension: "tif".to_string(),
            key_policy: CacheKeyPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Convenience for tests and embedders: a local-only cache in `dir`.
    pub fn local(dir: impl AsRef<Path>) -> Self {
        Self { local_dir: dir.as_ref().to_path_buf(), ..Self::default() }
    }
}

/// Which materialisation strategy to use on a cache miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyChoice {
    /// Async job when the shared mount is active, direct download otherwise.
    #[default]
    Auto,
    AsyncJob,
    DirectDownload,
}

impl Display for StrategyChoice {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            StrategyChoice::Auto => "auto",
            StrategyChoice::AsyncJob => "async-job",
            StrategyChoice::DirectDownload => "direct-download",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub strategy: StrategyChoice,
    /// Seconds between job status polls.
    pub poll_interval: u64,
    /// Seconds before an in-progress wait is abandoned. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    /// Folder under the shared mount that the provider writes finished jobs to.
    pub export_folder: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::default(),
            poll_interval: 30,
            deadline: None,
            export_folder: "exports".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline.map(Duration::from_secs)
    }
}

/// Connection details for the remote compute provider.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            project: "default".to_string(),
            token: None,
        }
    }
}

// Keep bearer tokens out of logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
