//! Layered configuration for terracache.
//!
//! Layers, lowest precedence first:
//!
//! 1. compiled defaults,
//! 2. a config file (the platform default, or an explicit path) in TOML,
//!    YAML or JSON, chosen by extension,
//! 3. environment variables prefixed `TERRACACHE_`, with `__` separating
//!    nested keys (`TERRACACHE_CACHE__SHARED_MOUNT=/mnt/drive`).

pub mod error;
mod model;

pub use crate::model::{CacheConfig, Config, ExportConfig, ProviderConfig, StrategyChoice};

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "TERRACACHE_";
const DEFAULT_FILE_STEMS: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];

impl Config {
    /// Load from defaults, the platform config file (if any) and the environment.
    pub fn load() -> Result<Self> {
        let file = default_config_file();
        if let Some(path) = &file {
            tracing::debug!(path = %path.display(), "using default config file");
        }
        Self::extract(figment(file.as_deref())?)
    }

    /// Load from defaults, an explicit file and the environment. The file
    /// must exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::extract(figment(Some(path))?)
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, mid-export.
    pub fn validate(&self) -> Result<()> {
        if self.export.poll_interval == 0 {
            exn::bail!(ErrorKind::Invalid("export.poll_interval must be at least one second".to_string()));
        }
        let extension = self.cache.extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains(['/', '\\']) {
            exn::bail!(ErrorKind::Invalid(format!("cache.extension {:?} is not a file extension", self.cache.extension)));
        }
        if self.cache.shared_dir.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("cache.shared_dir must not be empty".to_string()));
        }
        if self.export.deadline == Some(0) {
            exn::bail!(ErrorKind::Invalid("export.deadline must be at least one second when set".to_string()));
        }
        Ok(())
    }
}

/// Build the layered [`Figment`] without extracting it, so callers can merge
/// their own providers on top.
pub fn figment(file: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = file {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        figment = match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        };
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// First existing `config.{toml,yaml,yml,json}` in the platform config dir.
pub fn default_config_file() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "terracache")?;
    DEFAULT_FILE_STEMS.iter().map(|name| dirs.config_dir().join(name)).find(|path| path.is_file())
}
