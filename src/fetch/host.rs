//! Host collaborators consumed by the fetch core.
//!
//! The core never talks to the filesystem, site configuration or markup parser
//! directly for source data; it goes through these seams so the host (or a
//! test) can substitute its own implementation.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;

use crate::cache::{DependencyKind, DependencyTracker};
use crate::domain::{CacheMode, FetchError, ResourceIdentity, WikiPath};

use super::context::{FetchEnv, RequestContext};

/// Read access to source files.
pub trait SourceFiles: Send + Sync {
    /// Modification time, or `None` when the file does not exist.
    fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>>;
    fn read(&self, path: &Path) -> io::Result<Bytes>;

    fn exists(&self, path: &Path) -> bool {
        matches!(self.modified(path), Ok(Some(_)))
    }
}

/// Site configuration values.
pub trait ConfigValues: Send + Sync {
    fn value(&self, name: &str) -> Option<String>;
}

/// In-memory configuration values (the `[site.values]` table).
#[derive(Debug, Clone, Default)]
pub struct StaticConfigValues {
    values: BTreeMap<String, String>,
}

impl StaticConfigValues {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl ConfigValues for StaticConfigValues {
    fn value(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Everything a markup renderer may consult; each lookup registers a dependency.
pub struct RenderScope<'r, 'a> {
    ctx: &'r RequestContext,
    identity: &'r ResourceIdentity,
    cache_mode: CacheMode,
    tracker: &'r mut DependencyTracker<'a>,
}

impl<'r, 'a> RenderScope<'r, 'a> {
    pub(crate) fn new(
        ctx: &'r RequestContext,
        identity: &'r ResourceIdentity,
        cache_mode: CacheMode,
        tracker: &'r mut DependencyTracker<'a>,
    ) -> Self {
        Self {
            ctx,
            identity,
            cache_mode,
            tracker,
        }
    }

    /// The fragment being rendered.
    pub fn identity(&self) -> &ResourceIdentity {
        self.identity
    }

    pub fn config_value(&mut self, name: &str) -> Option<String> {
        self.tracker
            .add_dependency(DependencyKind::ConfigValue, name);
        self.ctx.env().config_values.value(name)
    }

    /// The page the current request targets; output then varies per requested page.
    pub fn requested_page(&mut self) -> Option<ResourceIdentity> {
        self.tracker
            .add_dependency(DependencyKind::RequestedPage, super::context::REQUESTED_PAGE_REFERENCE);
        self.ctx.requested_page().cloned()
    }

    /// Render another page of the same drive as a nested fragment.
    ///
    /// A missing, invalid or self-including page comes back as an inline error
    /// block; only internal failures abort the render.
    pub fn fragment(&mut self, id: &str) -> Result<String, FetchError> {
        let path = match WikiPath::parse(id) {
            Ok(path) => path,
            Err(err) => return Ok(err.to_inline_html()),
        };
        let identity = ResourceIdentity::new(self.identity.drive().clone(), path);
        super::kinds::markup::embedded_fragment(self.ctx, identity, self.cache_mode, self.tracker)
    }
}

/// Converts markup source text into HTML.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, source: &str, scope: &mut RenderScope<'_, '_>) -> Result<String, FetchError>;
}

/// Resolves a runtime slot (e.g. `sidebar`) for the requested page.
pub trait SlotResolver: Send + Sync {
    fn resolve_slot(
        &self,
        name: &str,
        requested: &ResourceIdentity,
        env: &FetchEnv,
    ) -> Option<ResourceIdentity>;
}

/// Looks for a page named after the slot in the requested page's namespace,
/// then in each enclosing namespace up to the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceSlotResolver;

impl SlotResolver for NamespaceSlotResolver {
    fn resolve_slot(
        &self,
        name: &str,
        requested: &ResourceIdentity,
        env: &FetchEnv,
    ) -> Option<ResourceIdentity> {
        let namespace = requested.path().namespace();
        (0..=namespace.len()).rev().find_map(|depth| {
            let candidate = ResourceIdentity::new(
                requested.drive().clone(),
                requested.path().sibling(&namespace[..depth], name),
            );
            let source = env.drives.resolve(&candidate).ok()?;
            env.files.exists(&source.path).then_some(candidate)
        })
    }
}

/// Target size of a raster transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

/// Optional raster transform collaborator; resizing itself lives in the host.
pub trait ImageTransformer: Send + Sync {
    fn transform(&self, source: &[u8], mime: &str, target: TargetSize) -> Result<Bytes, FetchError>;
}
