//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::Drive;
use crate::fetch::resolver::{DriveKind, DriveSpec, default_drives};

pub use cli::{
    CliArgs, Command, FetchArgs, KeyArgs, ReportArgs, SettingsOverrides, UrlArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wikifetch";
const ENV_PREFIX: &str = "WIKIFETCH";
const DEFAULT_CACHE_DIR: &str = "data/cache";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_RECACHE_INTERVAL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FETCH_BASE_URL: &str = "http://localhost/lib/exe/fetch.php";
/// Extensions `config` probes for a basename, in its lookup order.
const CONFIG_EXTENSIONS: &[&str] = &["toml", "json", "yaml", "yml", "ini", "ron", "json5"];

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub site: SiteSettings,
    pub drives: Vec<DriveSpec>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub recache_interval: Duration,
    /// Files every cached entry depends on (site configuration).
    pub config_files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub fetch_base_url: Url,
    /// Site configuration values visible to renderers.
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    // The settings files themselves shape rendered output.
    let loaded = [DEFAULT_CONFIG_BASENAME, LOCAL_CONFIG_BASENAME]
        .into_iter()
        .filter_map(|basename| resolve_config_file(Path::new(basename)))
        .chain(cli.config_file.clone());
    raw.track_config_files(loaded);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

/// The file `config` would load for `basename`, if any.
fn resolve_config_file(basename: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| basename.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    site: RawSiteSettings,
    drives: Vec<RawDriveSettings>,
}

impl RawSettings {
    fn track_config_files(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        for file in files {
            if !self.cache.config_files.contains(&file) {
                self.cache.config_files.push(file);
            }
        }
    }

    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.recache_interval_seconds {
            self.cache.recache_interval_seconds = Some(seconds);
        }
        if let Some(url) = overrides.fetch_base_url.as_ref() {
            self.site.fetch_base_url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    directory: Option<PathBuf>,
    recache_interval_seconds: Option<u64>,
    config_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    fetch_base_url: Option<String>,
    values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDriveSettings {
    name: String,
    root: PathBuf,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    attic: Option<PathBuf>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            site,
            drives,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            site: build_site_settings(site)?,
            drives: build_drives(drives)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    if let Some(empty) = cache
        .config_files
        .iter()
        .position(|path| path.as_os_str().is_empty())
    {
        return Err(LoadError::invalid(
            "cache.config_files",
            format!("entry {empty} is an empty path"),
        ));
    }

    let recache_secs = cache
        .recache_interval_seconds
        .unwrap_or(DEFAULT_RECACHE_INTERVAL_SECS);

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        directory,
        recache_interval: Duration::from_secs(recache_secs),
        config_files: cache.config_files,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let raw_url = site
        .fetch_base_url
        .unwrap_or_else(|| DEFAULT_FETCH_BASE_URL.to_string());
    let fetch_base_url = Url::parse(raw_url.trim()).map_err(|err| {
        LoadError::invalid("site.fetch_base_url", format!("failed to parse: {err}"))
    })?;
    if fetch_base_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "site.fetch_base_url",
            "must be a hierarchical URL",
        ));
    }

    Ok(SiteSettings {
        fetch_base_url,
        values: site.values,
    })
}

fn build_drives(drives: Vec<RawDriveSettings>) -> Result<Vec<DriveSpec>, LoadError> {
    if drives.is_empty() {
        return Ok(default_drives(Path::new(DEFAULT_DATA_DIR)));
    }

    let mut seen = BTreeSet::new();
    drives
        .into_iter()
        .map(|drive| {
            let name = Drive::parse(&drive.name)
                .map_err(|err| LoadError::invalid("drives.name", err.to_string()))?;
            if !seen.insert(name.clone()) {
                return Err(LoadError::invalid(
                    "drives.name",
                    format!("drive `{name}` is declared twice"),
                ));
            }
            if drive.root.as_os_str().is_empty() {
                return Err(LoadError::invalid(
                    "drives.root",
                    format!("drive `{name}` has an empty root"),
                ));
            }
            let kind = match drive.kind.as_deref().map(str::trim) {
                None | Some("media") => DriveKind::Media,
                Some("markup") => DriveKind::Markup,
                Some(other) => {
                    return Err(LoadError::invalid(
                        "drives.kind",
                        format!("unknown drive kind `{other}` (expected media or markup)"),
                    ));
                }
            };
            Ok(DriveSpec {
                name,
                kind,
                root: drive.root,
                attic: drive.attic,
            })
        })
        .collect()
}
