//! Fetcher registry: fetcher-name token to constructor, with MIME fallback.

use std::collections::BTreeMap;

use tracing::{error, warn};
use url::Url;

use crate::domain::{FetchError, FetchErrorKind};

use super::context::RequestContext;
use super::fetcher::Fetcher;
use super::kinds;
use super::request::FetchRequest;

/// Constructor registered for a fetcher name.
pub type FetcherFactory =
    fn(FetchRequest, &RequestContext) -> Result<Box<dyn Fetcher>, FetchError>;

const SVG_MIME: &str = "image/svg+xml";

/// Compile-time registration table, populated at startup.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    factories: BTreeMap<&'static str, FetcherFactory>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &(name, factory) in kinds::BUILT_IN {
            registry.register(name, factory);
        }
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register(&mut self, name: &'static str, factory: FetcherFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct the fetcher for a parsed request.
    ///
    /// An explicit fetcher name must match a registered kind exactly. Without
    /// one, the identity's MIME type picks the kind: SVG, other images, then raw.
    pub fn resolve(
        &self,
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        match request.fetcher() {
            Some(name) => {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| FetchError::not_found(format!("fetcher `{name}`")))?;
                factory(request, ctx)
            }
            None => {
                let kind = self.kind_for_mime(&request, ctx)?;
                let factory = self.factories.get(kind).ok_or_else(|| {
                    FetchError::internal(format!("fallback fetcher `{kind}` is not registered"))
                })?;
                factory(request.with_fetcher(kind), ctx)
            }
        }
    }

    pub fn resolve_url(
        &self,
        url: &Url,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        self.resolve(FetchRequest::from_url(url)?, ctx)
    }

    pub fn resolve_attributes<I, K, V>(
        &self,
        attributes: I,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.resolve(FetchRequest::from_attributes(attributes)?, ctx)
    }

    /// Fetch URL for a markup tag, or an inline error block when the tag cannot be resolved.
    pub fn embed<I, K, V>(&self, attributes: I, ctx: &RequestContext) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let resolved = self
            .resolve_attributes(attributes, ctx)
            .and_then(|mut fetcher| fetcher.fetch_url(ctx));
        match resolved {
            Ok(url) => url.to_string(),
            Err(err) => {
                if err.kind() == FetchErrorKind::Internal {
                    error!(
                        op = "registry::embed",
                        result = "internal_error",
                        error = %err,
                        "Fetcher registry misconfigured"
                    );
                } else {
                    warn!(
                        op = "registry::embed",
                        result = "inline_error",
                        error_kind = err.kind().as_str(),
                        error = %err,
                        "Rendering inline fetch error"
                    );
                }
                err.to_inline_html()
            }
        }
    }

    fn kind_for_mime(
        &self,
        request: &FetchRequest,
        ctx: &RequestContext,
    ) -> Result<&'static str, FetchError> {
        let source = ctx.env().drives.resolve(request.identity())?;
        match source.mime.as_deref() {
            None => Err(FetchError::not_found(format!(
                "a fetcher for `{}` (unknown MIME type)",
                request.identity()
            ))),
            Some(SVG_MIME) => Ok(kinds::svg::NAME),
            Some(mime) if mime.starts_with("image/") => Ok(kinds::raster::NAME),
            Some(_) => Ok(kinds::raw::NAME),
        }
    }
}
