//! Raster images. Resizing is delegated to the host's [`ImageTransformer`];
//! without one, the original is served.

use std::path::Path;

use tracing::debug;

use crate::cache::{CacheKey, DependencyKind};
use crate::domain::FetchError;
use crate::domain::params::{HEIGHT, WIDTH};
use crate::fetch::context::RequestContext;
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::host::TargetSize;
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;
use crate::fetch::resolver::ResolvedSource;

use super::{existing_source, source_buster};

pub const NAME: &str = "raster";

pub struct RasterFetcher {
    request: FetchRequest,
    source: ResolvedSource,
    mime: String,
    width: Option<u32>,
    height: Option<u32>,
    output: CachedOutput,
}

impl RasterFetcher {
    pub fn new(request: FetchRequest, ctx: &RequestContext) -> Result<Self, FetchError> {
        let width = request.parameters().positive_u32(WIDTH)?;
        let height = request.parameters().positive_u32(HEIGHT)?;
        let source = existing_source(request.identity(), ctx)?;
        let mime = match source.mime.as_deref() {
            Some(mime) if mime.starts_with("image/") => mime.to_string(),
            _ => {
                return Err(FetchError::bad_argument(
                    "id",
                    format!("`{}` is not a raster image", request.identity()),
                ));
            }
        };
        let output = CachedOutput::new(NAME, "image", source.extension());
        Ok(Self {
            request,
            source,
            mime,
            width,
            height,
            output,
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }

    /// Size to produce, or `None` when the original already fits the request.
    fn target_size(&self, source: &[u8]) -> Result<Option<TargetSize>, FetchError> {
        if self.width.is_none() && self.height.is_none() {
            return Ok(None);
        }
        let original = imagesize::blob_size(source).map_err(|err| {
            FetchError::bad_argument(
                "id",
                format!("`{}` is not a readable image: {err}", self.request.identity()),
            )
        })?;
        let (original_width, original_height) = (original.width as u64, original.height as u64);
        if original_width == 0 || original_height == 0 {
            return Ok(None);
        }

        let scaled = |value: u32, numerator: u64, denominator: u64| -> u32 {
            let result = (u64::from(value) * numerator + denominator / 2) / denominator;
            u32::try_from(result.max(1)).unwrap_or(u32::MAX)
        };
        let target = match (self.width, self.height) {
            (Some(width), Some(height)) => TargetSize { width, height },
            (Some(width), None) => TargetSize {
                width,
                height: scaled(width, original_height, original_width),
            },
            (None, Some(height)) => TargetSize {
                width: scaled(height, original_width, original_height),
                height,
            },
            (None, None) => return Ok(None),
        };

        let unchanged = u64::from(target.width) == original_width
            && u64::from(target.height) == original_height;
        Ok((!unchanged).then_some(target))
    }
}

impl Fetcher for RasterFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn request(&self) -> &FetchRequest {
        &self.request
    }

    fn mime(&self) -> &str {
        &self.mime
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
        if self.output.result().is_none() {
            let transformer = ctx.env().images.clone();
            let target = match (&transformer, self.width.or(self.height)) {
                (Some(_), Some(_)) => self.target_size(&ctx.env().files.read(&self.source.path)?)?,
                _ => None,
            };

            if let (Some(transformer), Some(target)) = (transformer, target) {
                let path: &Path = &self.source.path;
                let mime = &self.mime;
                return self.output.resolve(ctx, &self.request, |tracker| {
                    tracker.add_dependency(DependencyKind::File, path.to_string_lossy().into_owned());
                    let source = ctx.env().files.read(path)?;
                    transformer.transform(&source, mime, target)
                });
            }

            debug!(
                op = "raster::process",
                fetcher = NAME,
                id = %self.request.identity(),
                "Serving original image"
            );
        }
        self.output
            .serve_file(ctx, &self.request, self.source.path.clone())
    }
}
