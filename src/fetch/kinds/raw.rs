//! Any drive file, served verbatim.

use crate::cache::CacheKey;
use crate::domain::FetchError;
use crate::fetch::context::RequestContext;
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;
use crate::fetch::resolver::ResolvedSource;

use super::{existing_source, source_buster};

pub const NAME: &str = "raw";
const FALLBACK_MIME: &str = "application/octet-stream";

pub struct RawFetcher {
    request: FetchRequest,
    source: ResolvedSource,
    output: CachedOutput,
}

impl RawFetcher {
    pub fn new(request: FetchRequest, ctx: &RequestContext) -> Result<Self, FetchError> {
        let source = existing_source(request.identity(), ctx)?;
        let output = CachedOutput::new(NAME, "file", source.extension());
        Ok(Self {
            request,
            source,
            output,
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }
}

impl Fetcher for RawFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn request(&self) -> &FetchRequest {
        &self.request
    }

    fn mime(&self) -> &str {
        self.source.mime.as_deref().unwrap_or(FALLBACK_MIME)
    }

    fn state(&self) -> FetchState {
        self.output.state()
    }

    fn cache_key(&self) -> Result<&CacheKey, FetchError> {
        Err(FetchError::not_supported(NAME, "cache_key"))
    }

    fn buster(&mut self, ctx: &RequestContext) -> Result<Option<String>, FetchError> {
        source_buster(ctx, &self.source.path)
    }

    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError> {
        self.output
            .serve_file(ctx, &self.request, self.source.path.clone())
    }
}
