#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::TempDir;
use url::Url;
use wikifetch::cache::{CacheConfig, CacheOutcome};
use wikifetch::domain::FetchError;
use wikifetch::fetch::{
    ConfigValues, FetchEnv, Fetcher, FetcherRegistry, MarkupRenderer, RenderScope,
    RequestContext, DriveTable,
};
use wikifetch::infra::markup::ComrakMarkupRenderer;

/// Markup renderer counting how often generation actually runs.
#[derive(Default)]
pub struct CountingRenderer {
    inner: ComrakMarkupRenderer,
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarkupRenderer for CountingRenderer {
    fn render(&self, source: &str, scope: &mut RenderScope<'_, '_>) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(source, scope)
    }
}

/// Site configuration values that tests can change between requests.
#[derive(Default)]
pub struct MutableValues {
    values: RwLock<BTreeMap<String, String>>,
    lookups: RwLock<BTreeMap<String, usize>>,
}

impl MutableValues {
    pub fn set(&self, name: &str, value: &str) {
        self.values
            .write()
            .expect("values lock")
            .insert(name.to_string(), value.to_string());
    }

    pub fn lookups(&self, name: &str) -> usize {
        self.lookups
            .read()
            .expect("lookups lock")
            .get(name)
            .copied()
            .unwrap_or_default()
    }
}

impl ConfigValues for MutableValues {
    fn value(&self, name: &str) -> Option<String> {
        *self
            .lookups
            .write()
            .expect("lookups lock")
            .entry(name.to_string())
            .or_default() += 1;
        self.values.read().expect("values lock").get(name).cloned()
    }
}

/// A wiki data directory with a cache store and counting collaborators.
pub struct Wiki {
    pub dir: TempDir,
    pub env: Arc<FetchEnv>,
    pub renderer: Arc<CountingRenderer>,
    pub values: Arc<MutableValues>,
    pub registry: FetcherRegistry,
}

impl Wiki {
    pub fn new() -> Self {
        Self::with_cache(|_| {})
    }

    pub fn with_cache(adjust: impl FnOnce(&mut CacheConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("pages")).expect("pages dir");
        fs::create_dir_all(dir.path().join("media")).expect("media dir");
        fs::create_dir_all(dir.path().join("conf")).expect("conf dir");
        fs::write(dir.path().join("conf/local.toml"), "title = \"Wiki\"\n").expect("conf");

        let mut cache = CacheConfig {
            directory: dir.path().join("cache"),
            config_files: vec![dir.path().join("conf/local.toml")],
            ..Default::default()
        };
        adjust(&mut cache);

        let renderer = Arc::new(CountingRenderer::default());
        let values = Arc::new(MutableValues::default());
        let env = FetchEnv::builder(
            cache,
            DriveTable::with_defaults(dir.path()),
            Url::parse("http://wiki.test/lib/exe/fetch.php").expect("base url"),
        )
        .renderer(renderer.clone())
        .config_values(values.clone())
        .build()
        .expect("fetch env");

        Self {
            dir,
            env: Arc::new(env),
            renderer,
            values,
            registry: FetcherRegistry::with_defaults(),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn page(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(&format!("pages/{name}.txt"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("page dir");
        }
        fs::write(&path, body).expect("page");
        path
    }

    pub fn media(&self, name: &str, body: &[u8]) -> PathBuf {
        let path = self.path(&format!("media/{name}"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("media dir");
        }
        fs::write(&path, body).expect("media");
        path
    }

    pub fn request(&self) -> RequestContext {
        RequestContext::new(Arc::clone(&self.env))
    }

    pub fn resolve(&self, ctx: &RequestContext, attributes: &[(&str, &str)]) -> Box<dyn Fetcher> {
        match self.registry.resolve_attributes(attributes.iter().copied(), ctx) {
            Ok(fetcher) => fetcher,
            Err(err) => panic!("resolve {attributes:?}: {err}"),
        }
    }

    /// Resolve and fetch in a fresh request, returning the content and the outcome
    /// recorded for `(fragment, mode)`.
    pub fn fetch(
        &self,
        attributes: &[(&str, &str)],
        fragment: &str,
        mode: &str,
    ) -> (Bytes, Option<CacheOutcome>) {
        let ctx = self.request();
        let mut fetcher = self.resolve(&ctx, attributes);
        let content = fetcher.fetch_bytes(&ctx).expect("fetch");
        (content, outcome(&ctx, fragment, mode))
    }
}

pub fn outcome(ctx: &RequestContext, fragment: &str, mode: &str) -> Option<CacheOutcome> {
    ctx.manager()
        .and_then(|report| report.get(fragment, mode).map(|slot| slot.outcome))
}

/// Push a file's modification time forward so the change is visible at any mtime granularity.
pub fn touch(path: &Path) {
    let current = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .unwrap_or_else(|_| SystemTime::now());
    let file = fs::File::options().write(true).open(path).expect("open for touch");
    file.set_modified(current + Duration::from_secs(5))
        .expect("set mtime");
}
