//! Cache configuration.
//!
//! Controls where entries live and how cache modes map to a maximum age, via
//! the `[cache]` section of `wikifetch.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::CacheMode;

const DEFAULT_DIRECTORY: &str = "data/cache";
const DEFAULT_RECACHE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Cache configuration from `wikifetch.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Persist generated artifacts; when off every fetch regenerates.
    pub enabled: bool,
    /// Root directory of the on-disk store.
    pub directory: PathBuf,
    /// Maximum age of an entry requested with `cache=recache`.
    pub recache_interval: Duration,
    /// Site configuration files every generated entry depends on.
    pub config_files: Vec<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            recache_interval: Duration::from_secs(DEFAULT_RECACHE_INTERVAL_SECS),
            config_files: Vec::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            directory: settings.directory.clone(),
            recache_interval: settings.recache_interval,
            config_files: settings.config_files.clone(),
        }
    }
}

impl CacheConfig {
    /// Maximum age for the requested mode; `None` means entries never expire by age.
    pub fn max_age(&self, mode: CacheMode) -> Option<Duration> {
        mode.max_age(self.recache_interval)
    }
}
