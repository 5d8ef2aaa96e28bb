//! The Fetcher contract shared by every resource kind.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use bytes::Bytes;
use url::Url;

use crate::cache::CacheKey;
use crate::domain::{FetchError, ResourceIdentity};

use super::context::RequestContext;
use super::request::FetchRequest;

/// Where produced content can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// A store entry on disk.
    Path(PathBuf),
    /// A source file served verbatim, read through the host's [`SourceFiles`].
    ///
    /// [`SourceFiles`]: super::host::SourceFiles
    Source(PathBuf),
    /// Generated content that is not backed by a store entry.
    Content(Bytes),
}

/// Lifecycle of one fetcher instance within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Constructed,
    Built,
    KeyComputed,
    Hit,
    Miss,
    Generated,
    Stored,
    Served,
    Failed,
}

impl FetchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Built => "built",
            Self::KeyComputed => "key_computed",
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Generated => "generated",
            Self::Stored => "stored",
            Self::Served => "served",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Served | Self::Failed)
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolvable resource request.
///
/// Generation is memoised per instance: repeated calls to [`Fetcher::process`]
/// (and everything built on it) generate at most once.
pub trait Fetcher {
    /// Registered name, also carried in fetch URLs.
    fn name(&self) -> &'static str;

    fn request(&self) -> &FetchRequest;

    /// MIME type of the produced content.
    fn mime(&self) -> &str;

    fn state(&self) -> FetchState;

    /// Cache key of this instance, computed on first use.
    ///
    /// Kinds that never cache return [`FetchError::NotSupported`].
    fn cache_key(&self) -> Result<&CacheKey, FetchError>;

    /// Token that changes whenever the produced content would change; `None` when unknown.
    fn buster(&mut self, ctx: &RequestContext) -> Result<Option<String>, FetchError>;

    /// Produce the content, from the store when usable.
    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError>;

    fn identity(&self) -> &ResourceIdentity {
        self.request().identity()
    }

    /// Re-encode this request as a fetch URL.
    fn fetch_url(&mut self, ctx: &RequestContext) -> Result<Url, FetchError> {
        let buster = self.buster(ctx)?;
        super::url::fetch_url(&ctx.env().base_url, self.name(), self.request(), buster.as_deref())
    }

    fn fetch_path(&mut self, ctx: &RequestContext) -> Result<PathBuf, FetchError> {
        let name = self.name();
        match self.process(ctx)? {
            FetchResult::Path(path) | FetchResult::Source(path) => Ok(path.clone()),
            FetchResult::Content(_) => Err(FetchError::not_supported(name, "fetch_path")),
        }
    }

    fn fetch_bytes(&mut self, ctx: &RequestContext) -> Result<Bytes, FetchError> {
        match self.process(ctx)? {
            FetchResult::Content(bytes) => Ok(bytes.clone()),
            FetchResult::Path(path) => Ok(Bytes::from(fs::read(path)?)),
            FetchResult::Source(path) => Ok(ctx.env().files.read(path)?),
        }
    }

    fn fetch_string(&mut self, ctx: &RequestContext) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(ctx)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| FetchError::internal(format!("{} output is not UTF-8: {err}", self.name())))
    }
}
