//! Shared fetch environment and the per-request context threaded through
//! fetcher construction and generation.

use std::cell::{OnceCell, Ref, RefCell};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::warn;
use url::Url;

use crate::cache::{
    CacheConfig, CacheKey, CacheManager, CacheOutcome, CacheStore, ChangeMarker, DependencyKind,
    DependencyResolver, StoreError, unix_nanos,
};
use crate::config::Settings;
use crate::domain::{FetchError, ResourceIdentity};
use crate::infra::fs::LocalFilesystem;
use crate::infra::markup::ComrakMarkupRenderer;

use super::host::{
    ConfigValues, ImageTransformer, MarkupRenderer, NamespaceSlotResolver, SlotResolver,
    SourceFiles, StaticConfigValues,
};
use super::resolver::DriveTable;

/// Reference used for the single "requested page" dependency.
pub const REQUESTED_PAGE_REFERENCE: &str = "requested-page";

/// Process-wide collaborators shared by every request.
pub struct FetchEnv {
    pub cache: CacheConfig,
    pub store: CacheStore,
    pub drives: DriveTable,
    pub base_url: Url,
    pub files: Arc<dyn SourceFiles>,
    pub config_values: Arc<dyn ConfigValues>,
    pub renderer: Arc<dyn MarkupRenderer>,
    pub slots: Arc<dyn SlotResolver>,
    pub images: Option<Arc<dyn ImageTransformer>>,
}

impl FetchEnv {
    pub fn builder(cache: CacheConfig, drives: DriveTable, base_url: Url) -> FetchEnvBuilder {
        FetchEnvBuilder {
            cache,
            drives,
            base_url,
            files: Arc::new(LocalFilesystem),
            config_values: Arc::new(StaticConfigValues::default()),
            renderer: Arc::new(ComrakMarkupRenderer::default()),
            slots: Arc::new(NamespaceSlotResolver),
            images: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        Self::builder(
            CacheConfig::from(&settings.cache),
            settings.drives.iter().cloned().collect(),
            settings.site.fetch_base_url.clone(),
        )
        .config_values(Arc::new(StaticConfigValues::new(settings.site.values.clone())))
        .build()
    }
}

pub struct FetchEnvBuilder {
    cache: CacheConfig,
    drives: DriveTable,
    base_url: Url,
    files: Arc<dyn SourceFiles>,
    config_values: Arc<dyn ConfigValues>,
    renderer: Arc<dyn MarkupRenderer>,
    slots: Arc<dyn SlotResolver>,
    images: Option<Arc<dyn ImageTransformer>>,
}

impl FetchEnvBuilder {
    pub fn files(mut self, files: Arc<dyn SourceFiles>) -> Self {
        self.files = files;
        self
    }

    pub fn config_values(mut self, values: Arc<dyn ConfigValues>) -> Self {
        self.config_values = values;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn MarkupRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn slots(mut self, slots: Arc<dyn SlotResolver>) -> Self {
        self.slots = slots;
        self
    }

    pub fn image_transformer(mut self, images: Arc<dyn ImageTransformer>) -> Self {
        self.images = Some(images);
        self
    }

    /// Open the store and assemble the environment.
    pub fn build(self) -> Result<FetchEnv, StoreError> {
        let store = CacheStore::open(&self.cache.directory)?;
        Ok(FetchEnv {
            cache: self.cache,
            store,
            drives: self.drives,
            base_url: self.base_url,
            files: self.files,
            config_values: self.config_values,
            renderer: self.renderer,
            slots: self.slots,
            images: self.images,
        })
    }
}

/// State for one incoming request: the requested page and the cache report.
pub struct RequestContext {
    env: Arc<FetchEnv>,
    requested_page: Option<ResourceIdentity>,
    manager: OnceCell<RefCell<CacheManager>>,
    building: RefCell<Vec<CacheKey>>,
}

impl RequestContext {
    pub fn new(env: Arc<FetchEnv>) -> Self {
        Self {
            env,
            requested_page: None,
            manager: OnceCell::new(),
            building: RefCell::new(Vec::new()),
        }
    }

    pub fn with_requested_page(mut self, page: ResourceIdentity) -> Self {
        self.requested_page = Some(page);
        self
    }

    pub fn env(&self) -> &FetchEnv {
        &self.env
    }

    pub fn shared_env(&self) -> Arc<FetchEnv> {
        Arc::clone(&self.env)
    }

    pub fn requested_page(&self) -> Option<&ResourceIdentity> {
        self.requested_page.as_ref()
    }

    /// Record a fetch outcome in this request's report, creating the report on first use.
    pub fn record(
        &self,
        fragment: &ResourceIdentity,
        mode: &str,
        fetcher: &'static str,
        outcome: CacheOutcome,
        key: Option<&CacheKey>,
        modified: Option<SystemTime>,
    ) {
        self.manager
            .get_or_init(|| RefCell::new(CacheManager::new()))
            .borrow_mut()
            .record(
                fragment.canonical(),
                mode,
                fetcher,
                outcome,
                key.map(CacheKey::as_str),
                modified,
            );
    }

    /// The report so far; `None` until something was recorded.
    pub fn manager(&self) -> Option<Ref<'_, CacheManager>> {
        self.manager.get().map(RefCell::borrow)
    }

    /// End the request and hand back its report.
    pub fn finish(self) -> CacheManager {
        self.manager
            .into_inner()
            .map(RefCell::into_inner)
            .unwrap_or_default()
    }

    /// Mark `key` as being generated by this request; a key already in
    /// progress means a fragment (transitively) includes itself.
    pub(crate) fn enter_build(&self, key: &CacheKey) -> Result<(), FetchError> {
        let mut building = self.building.borrow_mut();
        if building.contains(key) {
            return Err(FetchError::bad_argument(
                "id",
                format!("`{key}` includes itself"),
            ));
        }
        building.push(key.clone());
        Ok(())
    }

    /// True while this request is generating an entry (nested builds).
    pub(crate) fn is_building(&self) -> bool {
        !self.building.borrow().is_empty()
    }

    pub(crate) fn leave_build(&self, key: &CacheKey) {
        self.building.borrow_mut().retain(|entry| entry != key);
    }

    fn file_marker(&self, path: &Path) -> ChangeMarker {
        match self.env.files.modified(path) {
            Ok(Some(modified)) => ChangeMarker::modified(modified),
            Ok(None) => ChangeMarker::Absent,
            Err(err) => {
                warn!(
                    op = "context::file_marker",
                    path = %path.display(),
                    error = %err,
                    "Failed to stat dependency; treating it as changed"
                );
                ChangeMarker::Digest(format!("unreadable:{}", err.kind()))
            }
        }
    }

    /// Digest of an identity together with its source's modification time.
    fn identity_marker(&self, identity: &ResourceIdentity) -> ChangeMarker {
        let modified = self
            .env
            .drives
            .resolve(identity)
            .ok()
            .and_then(|source| self.env.files.modified(&source.path).ok().flatten())
            .map(unix_nanos)
            .unwrap_or_default();
        ChangeMarker::digest_of(&format!("{}|{modified}", identity.canonical()))
    }

    fn slot_marker(&self, reference: &str) -> ChangeMarker {
        let Some((slot, fallback)) = reference.split_once('@') else {
            return ChangeMarker::Absent;
        };
        let base = match self.requested_page() {
            Some(page) => page.clone(),
            None => match ResourceIdentity::from_canonical(fallback) {
                Ok(identity) => identity,
                Err(_) => return ChangeMarker::Absent,
            },
        };
        self.env
            .slots
            .resolve_slot(slot, &base, &self.env)
            .map(|resolved| self.identity_marker(&resolved))
            .unwrap_or(ChangeMarker::Absent)
    }
}

/// Reference of a runtime-slot dependency: the slot name plus the page used
/// for resolution when the request names no page.
pub fn slot_reference(slot: &str, fallback: &ResourceIdentity) -> String {
    format!("{slot}@{}", fallback.canonical())
}

impl DependencyResolver for RequestContext {
    fn current_marker(&self, kind: DependencyKind, reference: &str) -> ChangeMarker {
        match kind {
            DependencyKind::File | DependencyKind::Config => self.file_marker(Path::new(reference)),
            DependencyKind::ConfigValue => self
                .env
                .config_values
                .value(reference)
                .map(|value| ChangeMarker::digest_of(&value))
                .unwrap_or(ChangeMarker::Absent),
            DependencyKind::RequestedPage => self
                .requested_page()
                .map(|page| self.identity_marker(page))
                .unwrap_or(ChangeMarker::Absent),
            DependencyKind::RuntimeSlot => self.slot_marker(reference),
            DependencyKind::Fragment => match self
                .env
                .store
                .read_manifest(&CacheKey::from_raw(reference))
            {
                Ok(Some(manifest)) => ChangeMarker::Modified(manifest.written_at_ns),
                Ok(None) | Err(_) => ChangeMarker::Absent,
            },
        }
    }
}
