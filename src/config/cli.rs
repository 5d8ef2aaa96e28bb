use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the wikifetch binary.
#[derive(Debug, Parser)]
#[command(
    name = "wikifetch",
    version,
    about = "Resolve wiki fetch requests through the dependency-tracked cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WIKIFETCH_CONFIG_FILE", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: SettingsOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve a fetch URL and print (or save) the produced content.
    Fetch(FetchArgs),
    /// Build a request from tag attributes and print its fetch URL.
    Url(UrlArgs),
    /// Print the canonical cache key of a fetch URL.
    Key(KeyArgs),
    /// Fetch several URLs in one request and print the cache report.
    Report(ReportArgs),
    /// Remove every cache entry.
    Clear,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache directory.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath, global = true)]
    pub cache_directory: Option<PathBuf>,

    /// Enable or disable the on-disk cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the maximum age of entries requested with `cache=recache`.
    #[arg(long = "cache-recache-interval-seconds", value_name = "SECONDS", global = true)]
    pub recache_interval_seconds: Option<u64>,

    /// Override the base URL fetch URLs are built against.
    #[arg(long = "fetch-base-url", value_name = "URL", global = true)]
    pub fetch_base_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// Fetch URL, absolute or relative to the configured base URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Write the content to this file instead of standard output.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Page the request is made for (resolves runtime slots).
    #[arg(long = "page", value_name = "ID")]
    pub page: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct UrlArgs {
    /// Fetcher name; without it the kind is picked from the MIME type.
    #[arg(long, value_name = "NAME")]
    pub fetcher: Option<String>,

    /// Tag attribute, repeatable.
    #[arg(long = "attr", value_name = "NAME=VALUE", value_parser = parse_attribute)]
    pub attributes: Vec<(String, String)>,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Fetch URL, absolute or relative to the configured base URL.
    #[arg(value_name = "URL")]
    pub url: String,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    /// Fetch URLs resolved within one request.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Page the request is made for (resolves runtime slots).
    #[arg(long = "page", value_name = "ID")]
    pub page: Option<String>,
}

pub(crate) fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("`{raw}` is not of the form NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("`{raw}` has an empty attribute name"));
    }
    Ok((name.to_string(), value.to_string()))
}
