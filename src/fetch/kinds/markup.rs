//! Rendered markup pages.
//!
//! `mode=fragment` (the default) renders one page's markup to HTML.
//! `mode=page` assembles a full page: the page's own fragment plus the
//! `sidebar` runtime slot, each rendered and cached as a nested fragment.

use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheKey, DependencyKind, DependencyManifest, DependencyTracker};
use crate::domain::params::MODE;
use crate::domain::{CacheMode, FetchError, ResourceIdentity};
use crate::fetch::context::{REQUESTED_PAGE_REFERENCE, RequestContext, slot_reference};
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::host::RenderScope;
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;
use crate::fetch::resolver::{DriveKind, ResolvedSource};

use super::existing_source;

pub const NAME: &str = "markup";
pub const MIME: &str = "text/html";
pub const SIDEBAR_SLOT: &str = "sidebar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Fragment,
    Page,
}

impl RenderMode {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fragment" => Ok(Self::Fragment),
            "page" => Ok(Self::Page),
            other => Err(FetchError::bad_argument(
                MODE,
                format!("unknown render mode `{other}`"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::Page => "page",
        }
    }
}

pub struct MarkupFetcher {
    request: FetchRequest,
    source: ResolvedSource,
    mode: RenderMode,
    output: CachedOutput,
}

impl MarkupFetcher {
    pub fn new(mut request: FetchRequest, ctx: &RequestContext) -> Result<Self, FetchError> {
        request.drop_default(MODE, RenderMode::Fragment.as_str());
        let mode = request
            .parameters()
            .get(MODE)
            .map(RenderMode::parse)
            .transpose()?
            .unwrap_or(RenderMode::Fragment);

        let source = existing_source(request.identity(), ctx)?;
        if source.kind != DriveKind::Markup {
            return Err(FetchError::bad_argument(
                "drive",
                format!("`{}` is not on a markup drive", request.identity()),
            ));
        }

        Ok(Self {
            request,
            source,
            mode,
            output: CachedOutput::new(NAME, mode.as_str(), "html"),
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Dependencies of the last resolution; `None` before `process`.
    pub fn dependencies(&self) -> Option<&DependencyManifest> {
        self.output.dependencies()
    }
}

impl Fetcher for MarkupFetcher {
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
        Ok(self.output.key(&self.request))
    }

    /// Rendered output depends on configuration as much as on the source, so
    /// the buster follows the entry's write time.
    fn buster(&mut self, ctx: &RequestContext) -> Result<Option<String>, FetchError> {
        self.process(ctx)?;
        Ok(self.output.written_buster())
    }

    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError> {
        let identity = self.request.identity();
        let cache_mode = self.request.cache_mode();
        match self.mode {
            RenderMode::Fragment => {
                let source = &self.source;
                self.output.resolve(ctx, &self.request, |tracker| {
                    render_fragment(ctx, identity, source, cache_mode, tracker).map(Bytes::from)
                })
            }
            RenderMode::Page => self.output.resolve(ctx, &self.request, |tracker| {
                render_page(ctx, identity, cache_mode, tracker).map(Bytes::from)
            }),
        }
    }
}

fn render_fragment(
    ctx: &RequestContext,
    identity: &ResourceIdentity,
    source: &ResolvedSource,
    cache_mode: CacheMode,
    tracker: &mut DependencyTracker<'_>,
) -> Result<String, FetchError> {
    tracker.add_dependency(
        DependencyKind::File,
        source.path.to_string_lossy().into_owned(),
    );
    let bytes = ctx.env().files.read(&source.path)?;
    let text = String::from_utf8_lossy(&bytes);
    let mut scope = RenderScope::new(ctx, identity, cache_mode, tracker);
    ctx.env().renderer.render(&text, &mut scope)
}

fn render_page(
    ctx: &RequestContext,
    identity: &ResourceIdentity,
    cache_mode: CacheMode,
    tracker: &mut DependencyTracker<'_>,
) -> Result<String, FetchError> {
    tracker.add_dependency(DependencyKind::RequestedPage, REQUESTED_PAGE_REFERENCE);
    let content = nested_fragment(ctx, identity.clone(), cache_mode, tracker)?;

    tracker.add_dependency(
        DependencyKind::RuntimeSlot,
        slot_reference(SIDEBAR_SLOT, identity),
    );
    let base = ctx.requested_page().unwrap_or(identity);
    let sidebar = match ctx.env().slots.resolve_slot(SIDEBAR_SLOT, base, ctx.env()) {
        Some(slot) => Some(embedded_fragment(ctx, slot, cache_mode, tracker)?),
        None => None,
    };

    let mut html = format!(
        "<article class=\"wikifetch-page\" data-id=\"{}\">\n<div class=\"wikifetch-content\">\n{content}</div>\n",
        ammonia::clean_text(&identity.canonical())
    );
    if let Some(sidebar) = sidebar {
        html.push_str(&format!(
            "<aside class=\"wikifetch-sidebar\">\n{sidebar}</aside>\n"
        ));
    }
    html.push_str("</article>\n");
    Ok(html)
}

/// Render `identity` as a cached fragment and record it as a dependency of
/// the entry being built, together with everything the fragment depends on.
pub(crate) fn nested_fragment(
    ctx: &RequestContext,
    identity: ResourceIdentity,
    cache_mode: CacheMode,
    tracker: &mut DependencyTracker<'_>,
) -> Result<String, FetchError> {
    let request = FetchRequest::for_identity(NAME, identity, cache_mode);
    let mut fragment = MarkupFetcher::new(request, ctx)?;
    let html = fragment.fetch_string(ctx)?;

    let key = fragment.cache_key()?.clone();
    tracker.add_dependency(DependencyKind::Fragment, key.as_str());
    if let Some(dependencies) = fragment.output.dependencies() {
        tracker.extend(dependencies);
    }
    Ok(html)
}

/// Like [`nested_fragment`], but an include that is missing or invalid turns
/// into an inline error block instead of failing the including render.
///
/// The entry then depends on the include's source path, so creating the page
/// later invalidates it.
pub(crate) fn embedded_fragment(
    ctx: &RequestContext,
    identity: ResourceIdentity,
    cache_mode: CacheMode,
    tracker: &mut DependencyTracker<'_>,
) -> Result<String, FetchError> {
    let source = ctx.env().drives.resolve(&identity).ok();
    match nested_fragment(ctx, identity.clone(), cache_mode, tracker) {
        Ok(html) => Ok(html),
        Err(err @ (FetchError::NotFound { .. } | FetchError::BadArgument { .. })) => {
            if let Some(source) = source {
                tracker.add_dependency(
                    DependencyKind::File,
                    source.path.to_string_lossy().into_owned(),
                );
            }
            debug!(
                op = "markup::embed",
                fragment = %identity,
                error_kind = err.kind().as_str(),
                error = %err,
                "Embedding include failure inline"
            );
            Ok(err.to_inline_html())
        }
        Err(err) => Err(err),
    }
}
