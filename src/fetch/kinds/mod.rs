//! Built-in fetcher kinds.

pub mod cache_log;
pub mod login;
pub mod markup;
pub mod raster;
pub mod raw;
pub mod svg;

use std::path::Path;

use crate::cache::unix_nanos;
use crate::domain::{FetchError, ResourceIdentity};

use super::context::RequestContext;
use super::registry::FetcherFactory;
use super::resolver::ResolvedSource;

/// Registration table read by [`super::FetcherRegistry::with_defaults`].
pub const BUILT_IN: &[(&str, FetcherFactory)] = &[
    (raw::NAME, raw::RawFetcher::create),
    (svg::NAME, svg::SvgFetcher::create),
    (raster::NAME, raster::RasterFetcher::create),
    (markup::NAME, markup::MarkupFetcher::create),
    (cache_log::NAME, cache_log::CacheLogFetcher::create),
    (login::NAME, login::LoginFetcher::create),
];

/// Resolve an identity to a source file that must exist.
pub(crate) fn existing_source(
    identity: &ResourceIdentity,
    ctx: &RequestContext,
) -> Result<ResolvedSource, FetchError> {
    let source = ctx.env().drives.resolve(identity)?;
    if ctx.env().files.exists(&source.path) {
        Ok(source)
    } else {
        Err(FetchError::not_found(identity.canonical()))
    }
}

/// Buster from a source file's modification time.
pub(crate) fn source_buster(
    ctx: &RequestContext,
    path: &Path,
) -> Result<Option<String>, FetchError> {
    Ok(ctx
        .env()
        .files
        .modified(path)?
        .map(|modified| format!("{:x}", unix_nanos(modified))))
}
