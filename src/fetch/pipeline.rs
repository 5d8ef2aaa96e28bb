//! Store policy shared by the caching fetcher kinds.
//!
//! [`CachedOutput`] owns everything a kind needs to go from a request to a
//! served result: the lazily computed key, the freshness check, the per-key
//! build lock, dependency tracking during generation, the store write and the
//! request report. Kinds only supply the generator.

use std::cell::OnceCell;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::cache::{
    CacheKey, CacheOutcome, DependencyKind, DependencyManifest, DependencyTracker, EntryRef,
    Freshness, StoredManifest, mutex_lock, try_mutex_lock,
};
use crate::domain::FetchError;

use super::context::RequestContext;
use super::fetcher::{FetchResult, FetchState};
use super::request::FetchRequest;

const SOURCE: &str = "fetch::pipeline";

pub const METRIC_CACHE_HIT_TOTAL: &str = "wikifetch_cache_hit_total";
pub const METRIC_CACHE_MISS_TOTAL: &str = "wikifetch_cache_miss_total";
pub const METRIC_CACHE_BYPASS_TOTAL: &str = "wikifetch_cache_bypass_total";
pub const METRIC_CACHE_WRITE_ERROR_TOTAL: &str = "wikifetch_cache_write_error_total";
pub const METRIC_GENERATE_MS: &str = "wikifetch_generate_ms";

/// Memoised, cache-backed output of one fetcher instance.
#[derive(Debug)]
pub struct CachedOutput {
    fetcher: &'static str,
    mode: String,
    extension: String,
    log_writes: bool,
    key: OnceCell<CacheKey>,
    state: FetchState,
    result: Option<FetchResult>,
    manifest: Option<StoredManifest>,
    dependencies: Option<DependencyManifest>,
}

impl CachedOutput {
    /// `mode` labels the entry in the request report (e.g. `fragment`, `page`).
    pub fn new(fetcher: &'static str, mode: impl Into<String>, extension: &str) -> Self {
        Self {
            fetcher,
            mode: mode.into(),
            extension: extension.to_string(),
            log_writes: true,
            key: OnceCell::new(),
            state: FetchState::Built,
            result: None,
            manifest: None,
            dependencies: None,
        }
    }

    /// Keep this kind's writes out of the cache log.
    pub fn unlogged(mut self) -> Self {
        self.log_writes = false;
        self
    }

    pub fn key(&self, request: &FetchRequest) -> &CacheKey {
        self.key
            .get_or_init(|| CacheKey::build(request.identity(), request.parameters()))
    }

    pub fn state(&self) -> FetchState {
        match self.state {
            FetchState::Built if self.key.get().is_some() => FetchState::KeyComputed,
            state => state,
        }
    }

    pub fn result(&self) -> Option<&FetchResult> {
        self.result.as_ref()
    }

    /// Manifest of the served store entry, when the output came from or reached the store.
    pub fn manifest(&self) -> Option<&StoredManifest> {
        self.manifest.as_ref()
    }

    /// Everything the output was built from, even when the store write failed.
    pub fn dependencies(&self) -> Option<&DependencyManifest> {
        self.manifest
            .as_ref()
            .map(|manifest| &manifest.dependencies)
            .or(self.dependencies.as_ref())
    }

    /// Buster derived from the entry's own write time.
    pub fn written_buster(&self) -> Option<String> {
        self.manifest.as_ref().map(StoredManifest::buster)
    }

    /// Serve from the store when usable, otherwise generate, persist and serve.
    pub fn resolve<F>(
        &mut self,
        ctx: &RequestContext,
        request: &FetchRequest,
        generate: F,
    ) -> Result<&FetchResult, FetchError>
    where
        F: FnOnce(&mut DependencyTracker<'_>) -> Result<Bytes, FetchError>,
    {
        if self.result.is_some() {
            return self.served();
        }

        let env = ctx.env();
        if !env.cache.enabled {
            return self.bypass(ctx, request, generate);
        }

        let key = self.key(request).clone();
        let entry = EntryRef::new(key.clone(), &self.extension);
        let mode = request.cache_mode();

        if let Freshness::Fresh(manifest) =
            env.store.freshness(&entry, mode, &env.cache, ctx)
        {
            self.serve_hit(ctx, request, &entry, manifest);
            return self.served();
        }

        // A nested build must not wait: another thread may hold this key while
        // waiting on the entry this request is building.
        let nested = ctx.is_building();
        ctx.enter_build(&key)?;
        let digest = key.digest();
        let handle = env.store.locks().handle(&digest);
        let guard = if nested {
            try_mutex_lock(&handle, SOURCE, "pipeline::build")
        } else {
            Some(mutex_lock(&handle, SOURCE, "pipeline::build"))
        };

        let outcome = match env.store.freshness(&entry, mode, &env.cache, ctx) {
            Freshness::Fresh(manifest) => {
                debug!(
                    op = "pipeline::resolve",
                    fetcher = self.fetcher,
                    cache_key = %key,
                    "Entry produced by a concurrent builder"
                );
                self.serve_hit(ctx, request, &entry, manifest);
                Ok(())
            }
            stale => {
                debug!(
                    op = "pipeline::resolve",
                    fetcher = self.fetcher,
                    cache_key = %key,
                    reason = stale.reason(),
                    "Cache miss"
                );
                self.state = FetchState::Miss;
                self.build(ctx, request, &entry, generate)
            }
        };

        drop(guard);
        drop(handle);
        env.store.locks().release(&digest);
        ctx.leave_build(&key);

        outcome?;
        self.served()
    }

    /// Generate without touching the store.
    pub fn bypass<F>(
        &mut self,
        ctx: &RequestContext,
        request: &FetchRequest,
        generate: F,
    ) -> Result<&FetchResult, FetchError>
    where
        F: FnOnce(&mut DependencyTracker<'_>) -> Result<Bytes, FetchError>,
    {
        if self.result.is_some() {
            return self.served();
        }

        let key = self.key(request).clone();
        ctx.enter_build(&key)?;
        let mut tracker = DependencyTracker::new(ctx);
        let generated = self.generate_timed(&mut tracker, generate);
        ctx.leave_build(&key);
        let content = generated?;
        self.dependencies = Some(tracker.get_dependencies());
        self.result = Some(FetchResult::Content(content));

        counter!(METRIC_CACHE_BYPASS_TOTAL, "fetcher" => self.fetcher).increment(1);
        ctx.record(
            request.identity(),
            &self.mode,
            self.fetcher,
            CacheOutcome::Bypass,
            None,
            None,
        );
        self.served()
    }

    /// Serve an existing file verbatim (no generation, no store).
    pub fn serve_file(
        &mut self,
        ctx: &RequestContext,
        request: &FetchRequest,
        path: std::path::PathBuf,
    ) -> Result<&FetchResult, FetchError> {
        if self.result.is_none() {
            let modified = ctx.env().files.modified(&path)?;
            counter!(METRIC_CACHE_BYPASS_TOTAL, "fetcher" => self.fetcher).increment(1);
            ctx.record(
                request.identity(),
                &self.mode,
                self.fetcher,
                CacheOutcome::Bypass,
                None,
                modified,
            );
            self.result = Some(FetchResult::Source(path));
        }
        self.served()
    }

    fn build<F>(
        &mut self,
        ctx: &RequestContext,
        request: &FetchRequest,
        entry: &EntryRef,
        generate: F,
    ) -> Result<(), FetchError>
    where
        F: FnOnce(&mut DependencyTracker<'_>) -> Result<Bytes, FetchError>,
    {
        let env = ctx.env();
        let mut tracker = DependencyTracker::new(ctx);
        for config_file in &env.cache.config_files {
            tracker.add_dependency(
                DependencyKind::Config,
                config_file.to_string_lossy().into_owned(),
            );
        }

        let content = self.generate_timed(&mut tracker, generate)?;
        let dependencies = tracker.get_dependencies();
        self.state = FetchState::Generated;

        let written = if self.log_writes {
            env.store.write(entry, &content, dependencies.clone())
        } else {
            env.store.write_unlogged(entry, &content, dependencies.clone())
        };

        counter!(METRIC_CACHE_MISS_TOTAL, "fetcher" => self.fetcher).increment(1);
        match written {
            Ok(manifest) => {
                ctx.record(
                    request.identity(),
                    &self.mode,
                    self.fetcher,
                    CacheOutcome::Miss,
                    Some(entry.key()),
                    Some(manifest.written_at()),
                );
                self.state = FetchState::Stored;
                self.result = Some(FetchResult::Path(env.store.content_path(entry)));
                self.manifest = Some(manifest);
            }
            Err(err) => {
                counter!(METRIC_CACHE_WRITE_ERROR_TOTAL, "fetcher" => self.fetcher).increment(1);
                warn!(
                    op = "pipeline::store",
                    target_module = SOURCE,
                    result = "degraded",
                    fetcher = self.fetcher,
                    cache_key = %entry.key(),
                    error = %err,
                    "Failed to persist cache entry; serving generated content uncached"
                );
                ctx.record(
                    request.identity(),
                    &self.mode,
                    self.fetcher,
                    CacheOutcome::Miss,
                    Some(entry.key()),
                    None,
                );
                self.result = Some(FetchResult::Content(content));
            }
        }
        self.dependencies = Some(dependencies);
        Ok(())
    }

    fn serve_hit(
        &mut self,
        ctx: &RequestContext,
        request: &FetchRequest,
        entry: &EntryRef,
        manifest: StoredManifest,
    ) {
        counter!(METRIC_CACHE_HIT_TOTAL, "fetcher" => self.fetcher).increment(1);
        info!(
            op = "pipeline::resolve",
            result = "hit",
            fetcher = self.fetcher,
            cache_key = %entry.key(),
            "Serving cached entry"
        );
        ctx.record(
            request.identity(),
            &self.mode,
            self.fetcher,
            CacheOutcome::Hit,
            Some(entry.key()),
            Some(manifest.written_at()),
        );
        self.state = FetchState::Hit;
        self.result = Some(FetchResult::Path(ctx.env().store.content_path(entry)));
        self.manifest = Some(manifest);
    }

    fn generate_timed<F>(
        &mut self,
        tracker: &mut DependencyTracker<'_>,
        generate: F,
    ) -> Result<Bytes, FetchError>
    where
        F: FnOnce(&mut DependencyTracker<'_>) -> Result<Bytes, FetchError>,
    {
        let started_at = Instant::now();
        match generate(tracker) {
            Ok(content) => {
                let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
                histogram!(METRIC_GENERATE_MS, "fetcher" => self.fetcher).record(elapsed_ms);
                info!(
                    op = "pipeline::generate",
                    result = "ok",
                    fetcher = self.fetcher,
                    bytes = content.len(),
                    dependencies = tracker.len(),
                    elapsed_ms = elapsed_ms as u64,
                    "Generated content"
                );
                Ok(content)
            }
            Err(err) => {
                self.state = FetchState::Failed;
                warn!(
                    op = "pipeline::generate",
                    result = "failed",
                    fetcher = self.fetcher,
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "Generation failed"
                );
                Err(err)
            }
        }
    }

    fn served(&mut self) -> Result<&FetchResult, FetchError> {
        self.state = FetchState::Served;
        self.result
            .as_ref()
            .ok_or_else(|| FetchError::internal(format!("{} produced no result", self.fetcher)))
    }
}
