use std::{
    fs,
    io::{self, Write},
    process,
    sync::Arc,
};

use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;
use wikifetch::{
    cache::StoreError,
    config::{self, Command, FetchArgs, KeyArgs, LoadError, ReportArgs, UrlArgs},
    domain::{Drive, FetchError, ResourceIdentity},
    fetch::{FetchEnv, FetcherRegistry, RequestContext},
    infra::{error::InfraError, telemetry},
};

#[derive(Debug, Error)]
enum RunError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to open cache: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("`{input}` is not a valid fetch URL: {source}")]
    Url {
        input: String,
        source: url::ParseError,
    },
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &RunError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), RunError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let env = Arc::new(FetchEnv::from_settings(&settings)?);
    let registry = FetcherRegistry::with_defaults();

    match cli_args.command {
        Command::Fetch(args) => run_fetch(env, &registry, args),
        Command::Url(args) => run_url(env, &registry, args),
        Command::Key(args) => run_key(env, &registry, args),
        Command::Report(args) => run_report(env, &registry, args),
        Command::Clear => {
            env.store.clear()?;
            info!(root = %env.store.root().display(), "Cache cleared");
            Ok(())
        }
    }
}

fn run_fetch(env: Arc<FetchEnv>, registry: &FetcherRegistry, args: FetchArgs) -> Result<(), RunError> {
    let url = parse_fetch_url(&env.base_url, &args.url)?;
    let ctx = request_context(env, args.page.as_deref())?;
    let mut fetcher = registry.resolve_url(&url, &ctx)?;
    let content = fetcher.fetch_bytes(&ctx)?;
    info!(
        fetcher = fetcher.name(),
        id = %fetcher.identity(),
        mime = fetcher.mime(),
        bytes = content.len(),
        state = %fetcher.state(),
        "Fetched resource"
    );

    match args.output {
        Some(path) => fs::write(path, &content)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn run_url(env: Arc<FetchEnv>, registry: &FetcherRegistry, args: UrlArgs) -> Result<(), RunError> {
    let mut attributes = args.attributes;
    if let Some(name) = args.fetcher {
        attributes.push(("fetcher".to_string(), name));
    }

    let ctx = RequestContext::new(env);
    let mut fetcher = registry.resolve_attributes(attributes, &ctx)?;
    println!("{}", fetcher.fetch_url(&ctx)?);
    Ok(())
}

fn run_key(env: Arc<FetchEnv>, registry: &FetcherRegistry, args: KeyArgs) -> Result<(), RunError> {
    let url = parse_fetch_url(&env.base_url, &args.url)?;
    let ctx = RequestContext::new(env);
    let fetcher = registry.resolve_url(&url, &ctx)?;
    let key = fetcher.cache_key()?;
    println!("{}\t{}", key.digest(), key.as_str());
    Ok(())
}

fn run_report(env: Arc<FetchEnv>, registry: &FetcherRegistry, args: ReportArgs) -> Result<(), RunError> {
    let base_url = env.base_url.clone();
    let ctx = request_context(env, args.page.as_deref())?;

    for raw in &args.urls {
        let url = parse_fetch_url(&base_url, raw)?;
        let fetched = registry
            .resolve_url(&url, &ctx)
            .and_then(|mut fetcher| fetcher.fetch_bytes(&ctx));
        if let Err(err) = fetched {
            warn!(
                url = %url,
                error_kind = err.kind().as_str(),
                error = %err,
                "Fetch failed; continuing report"
            );
        }
    }

    let report = ctx.finish();
    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    Ok(())
}

/// Absolute URLs are taken as-is; anything else is joined onto the base URL.
fn parse_fetch_url(base: &Url, raw: &str) -> Result<Url, RunError> {
    Url::parse(raw)
        .or_else(|_| base.join(raw))
        .map_err(|source| RunError::Url {
            input: raw.to_string(),
            source,
        })
}

fn request_context(env: Arc<FetchEnv>, page: Option<&str>) -> Result<RequestContext, RunError> {
    let ctx = RequestContext::new(env);
    Ok(match page {
        Some(id) => ctx.with_requested_page(ResourceIdentity::parse(Drive::PAGE, id)?),
        None => ctx,
    })
}
