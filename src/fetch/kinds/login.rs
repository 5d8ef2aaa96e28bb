//! Login form. Identity pages are never cached: every fetch regenerates.

use bytes::Bytes;

use crate::cache::CacheKey;
use crate::domain::FetchError;
use crate::fetch::context::RequestContext;
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;

pub const NAME: &str = "login";
pub const MIME: &str = "text/html";
const TITLE_VALUE: &str = "login.title";
const DEFAULT_TITLE: &str = "Log in";

pub struct LoginFetcher {
    request: FetchRequest,
    output: CachedOutput,
}

impl LoginFetcher {
    pub fn new(request: FetchRequest, _ctx: &RequestContext) -> Result<Self, FetchError> {
        Ok(Self {
            request,
            output: CachedOutput::new(NAME, "form", "html"),
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }
}

impl Fetcher for LoginFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn request(&self) -> &FetchRequest {
        &self.request
    }

    fn mime(&self) -> &str {
        MIME
    }

    fn state(&self) -> FetchState {
        self.output.state()
    }

    fn cache_key(&self) -> Result<&CacheKey, FetchError> {
        Err(FetchError::not_supported(NAME, "cache_key"))
    }

    fn buster(&mut self, _ctx: &RequestContext) -> Result<Option<String>, FetchError> {
        Ok(None)
    }

    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError> {
        let identity = self.request.identity();
        self.output.bypass(ctx, &self.request, |_| {
            let title = ctx
                .env()
                .config_values
                .value(TITLE_VALUE)
                .unwrap_or_else(|| DEFAULT_TITLE.to_string());
            let html = format!(
                "<form class=\"wikifetch-login\" method=\"post\">\n\
                 <h2>{title}</h2>\n\
                 <input type=\"hidden\" name=\"id\" value=\"{id}\">\n\
                 <label>User <input type=\"text\" name=\"u\" autocomplete=\"username\"></label>\n\
                 <label>Password <input type=\"password\" name=\"p\" autocomplete=\"current-password\"></label>\n\
                 <button type=\"submit\">{title}</button>\n\
                 </form>\n",
                title = ammonia::clean_text(&title),
                id = ammonia::clean_text(identity.path().as_str()),
            );
            Ok(Bytes::from(html))
        })
    }
}
