//! SVG images, optionally resized or recoloured by rewriting the root `<svg>` element.

use bytes::Bytes;
use lol_html::{RewriteStrSettings, element, rewrite_str};

use crate::cache::{CacheKey, DependencyKind};
use crate::domain::FetchError;
use crate::domain::params::{COLOR, HEIGHT, WIDTH};
use crate::fetch::context::RequestContext;
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;
use crate::fetch::resolver::ResolvedSource;

use super::{existing_source, source_buster};

pub const NAME: &str = "svg";
pub const MIME: &str = "image/svg+xml";
const ASPECT: &str = "preserveaspectratio";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SvgOptions {
    width: Option<u32>,
    height: Option<u32>,
    color: Option<String>,
    aspect: Option<String>,
}

impl SvgOptions {
    fn from_request(request: &FetchRequest) -> Result<Self, FetchError> {
        let parameters = request.parameters();
        let color = parameters
            .get(COLOR)
            .map(|color| validate_color(color).map(str::to_string))
            .transpose()?;
        let aspect = parameters
            .get(ASPECT)
            .map(|aspect| validate_aspect(aspect).map(str::to_string))
            .transpose()?;
        Ok(Self {
            width: parameters.positive_u32(WIDTH)?,
            height: parameters.positive_u32(HEIGHT)?,
            color,
            aspect,
        })
    }

    fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

fn validate_color(raw: &str) -> Result<&str, FetchError> {
    let valid = match raw.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric()),
    };
    if valid {
        Ok(raw)
    } else {
        Err(FetchError::bad_argument(COLOR, format!("`{raw}` is not a colour")))
    }
}

fn validate_aspect(raw: &str) -> Result<&str, FetchError> {
    let mut parts = raw.split_ascii_whitespace();
    let align = parts.next().unwrap_or_default();
    let slice = parts.next();
    let align_ok = align == "none"
        || ["xMin", "xMid", "xMax"].iter().any(|x| {
            align
                .strip_prefix(x)
                .is_some_and(|y| matches!(y, "YMin" | "YMid" | "YMax"))
        });
    let slice_ok = matches!(slice, None | Some("meet") | Some("slice"));
    if align_ok && slice_ok && parts.next().is_none() {
        Ok(raw)
    } else {
        Err(FetchError::bad_argument(
            ASPECT,
            format!("`{raw}` is not a preserveAspectRatio value"),
        ))
    }
}

fn rewrite(svg: &str, options: &SvgOptions) -> Result<String, FetchError> {
    let mut root_seen = false;
    rewrite_str(
        svg,
        RewriteStrSettings {
            element_content_handlers: vec![element!("svg", move |el| {
                if root_seen {
                    return Ok(());
                }
                root_seen = true;
                if let Some(width) = options.width {
                    el.set_attribute("width", &width.to_string())?;
                }
                if let Some(height) = options.height {
                    el.set_attribute("height", &height.to_string())?;
                }
                if let Some(color) = &options.color {
                    el.set_attribute("fill", color)?;
                }
                if let Some(aspect) = &options.aspect {
                    el.set_attribute("preserveAspectRatio", aspect)?;
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|err| FetchError::internal(format!("svg rewrite failed: {err}")))
}

pub struct SvgFetcher {
    request: FetchRequest,
    source: ResolvedSource,
    options: SvgOptions,
    output: CachedOutput,
}

impl SvgFetcher {
    pub fn new(request: FetchRequest, ctx: &RequestContext) -> Result<Self, FetchError> {
        let options = SvgOptions::from_request(&request)?;
        let source = existing_source(request.identity(), ctx)?;
        if source.mime.as_deref() != Some(MIME) {
            return Err(FetchError::bad_argument(
                "id",
                format!("`{}` is not an SVG image", request.identity()),
            ));
        }
        Ok(Self {
            request,
            source,
            options,
            output: CachedOutput::new(NAME, "image", "svg"),
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }
}

impl Fetcher for SvgFetcher {
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

    fn buster(&mut self, ctx: &RequestContext) -> Result<Option<String>, FetchError> {
        source_buster(ctx, &self.source.path)
    }

    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError> {
        if self.options.is_identity() {
            return self
                .output
                .serve_file(ctx, &self.request, self.source.path.clone());
        }

        let path = &self.source.path;
        let options = &self.options;
        self.output.resolve(ctx, &self.request, |tracker| {
            tracker.add_dependency(DependencyKind::File, path.to_string_lossy().into_owned());
            let source = ctx.env().files.read(path)?;
            let text = std::str::from_utf8(&source).map_err(|_| {
                FetchError::bad_argument("id", format!("`{}` is not UTF-8 text", path.display()))
            })?;
            Ok(Bytes::from(rewrite(text, options)?))
        })
    }
}
