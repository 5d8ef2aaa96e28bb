//! JSON view of the store's own cache log.

use bytes::Bytes;

use crate::cache::{CacheKey, DependencyKind};
use crate::domain::{Drive, FetchError};
use crate::fetch::context::RequestContext;
use crate::fetch::fetcher::{FetchResult, FetchState, Fetcher};
use crate::fetch::pipeline::CachedOutput;
use crate::fetch::request::FetchRequest;

pub const NAME: &str = "cache-log";
pub const MIME: &str = "application/json";
const LIMIT: &str = "limit";
const DEFAULT_LIMIT: u32 = 50;

pub struct CacheLogFetcher {
    request: FetchRequest,
    limit: u32,
    output: CachedOutput,
}

impl CacheLogFetcher {
    pub fn new(mut request: FetchRequest, _ctx: &RequestContext) -> Result<Self, FetchError> {
        if request.identity().drive().as_str() != Drive::CACHE {
            return Err(FetchError::bad_argument(
                "drive",
                format!("the cache log lives on the `{}` drive", Drive::CACHE),
            ));
        }
        request.drop_default(LIMIT, &DEFAULT_LIMIT.to_string());
        let limit = request
            .parameters()
            .positive_u32(LIMIT)?
            .unwrap_or(DEFAULT_LIMIT);

        Ok(Self {
            request,
            limit,
            // Writing this entry must not touch the log it depends on.
            output: CachedOutput::new(NAME, "log", "json").unlogged(),
        })
    }

    pub fn create(
        request: FetchRequest,
        ctx: &RequestContext,
    ) -> Result<Box<dyn Fetcher>, FetchError> {
        Ok(Box::new(Self::new(request, ctx)?))
    }
}

impl Fetcher for CacheLogFetcher {
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
        self.process(ctx)?;
        Ok(self.output.written_buster())
    }

    fn process(&mut self, ctx: &RequestContext) -> Result<&FetchResult, FetchError> {
        let limit = self.limit;
        self.output.resolve(ctx, &self.request, |tracker| {
            let store = &ctx.env().store;
            tracker.add_dependency(
                DependencyKind::File,
                store.log_path().to_string_lossy().into_owned(),
            );
            let records = store.read_log(limit as usize)?;
            let document = serde_json::json!({
                "limit": limit,
                "records": records,
            });
            serde_json::to_vec_pretty(&document)
                .map(Bytes::from)
                .map_err(|err| FetchError::internal(format!("cache log encoding failed: {err}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::cache::{CacheConfig, DependencyManifest, EntryRef, LogOp};
    use crate::fetch::context::FetchEnv;
    use crate::fetch::resolver::DriveTable;

    fn context() -> (TempDir, Arc<FetchEnv>) {
        let dir = TempDir::new().expect("temp dir");
        let env = FetchEnv::builder(
            CacheConfig {
                directory: dir.path().join("cache"),
                ..Default::default()
            },
            DriveTable::with_defaults(dir.path()),
            Url::parse("http://wiki.test/fetch").expect("url"),
        )
        .build()
        .expect("env");
        (dir, Arc::new(env))
    }

    fn log_fetcher(ctx: &RequestContext) -> CacheLogFetcher {
        let request = FetchRequest::from_attributes([("fetcher", "cache-log"), ("id", "log"), ("limit", "50")])
            .expect("request");
        CacheLogFetcher::new(request, ctx).expect("fetcher")
    }

    fn document(fetcher: &mut CacheLogFetcher, ctx: &RequestContext) -> serde_json::Value {
        serde_json::from_str(&fetcher.fetch_string(ctx).expect("content")).expect("json")
    }

    #[test]
    fn reflects_store_writes_and_stays_fresh_otherwise() {
        let (_dir, env) = context();
        let ctx = RequestContext::new(Arc::clone(&env));
        let mut first = log_fetcher(&ctx);
        assert_eq!(first.cache_key().expect("key").as_str(), "cache:log");
        assert_eq!(document(&mut first, &ctx)["records"], serde_json::json!([]));

        let ctx = RequestContext::new(Arc::clone(&env));
        let mut unchanged = log_fetcher(&ctx);
        unchanged.process(&ctx).expect("second");
        assert_eq!(unchanged.state(), FetchState::Served);
        assert_eq!(
            ctx.manager().and_then(|report| report.get("cache:log", "log").map(|slot| slot.outcome)),
            Some(crate::cache::CacheOutcome::Hit)
        );

        env.store
            .write(
                &EntryRef::new(CacheKey::from_raw("page:foo"), "html"),
                b"foo",
                DependencyManifest::default(),
            )
            .expect("write");

        let ctx = RequestContext::new(env);
        let mut refreshed = log_fetcher(&ctx);
        let value = document(&mut refreshed, &ctx);
        let records: Vec<crate::cache::CacheLogRecord> =
            serde_json::from_value(value["records"].clone()).expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].op, LogOp::Write);
        assert_eq!(records[0].key.as_deref(), Some("page:foo"));
    }

    #[test]
    fn requires_the_cache_drive() {
        let (_dir, env) = context();
        let ctx = RequestContext::new(env);
        let request = FetchRequest::from_attributes([("fetcher", "cache-log"), ("id", "log"), ("drive", "page")])
            .expect("request");
        assert!(CacheLogFetcher::new(request, &ctx).is_err());
    }
}
