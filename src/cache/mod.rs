//! Wikifetch cache layer.
//!
//! - **Keys**: deterministic identifiers derived from identity + output-affecting parameters
//! - **Store**: content + dependency manifest pairs on local disk
//! - **Dependencies**: what an entry was built from, re-checked on every lookup
//! - **Manager**: per-request report of hits and misses
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! directory = "data/cache"
//! recache_interval_seconds = 86400
//! config_files = ["conf/local.toml"]
//! ```

mod config;
pub mod deps;
mod keys;
mod lock;
mod manager;
mod store;

pub use config::CacheConfig;
pub use deps::{
    ChangeMarker, Dependency, DependencyKind, DependencyManifest, DependencyResolver,
    DependencyTracker,
};
pub use keys::{CacheKey, hash_value};
pub use manager::{CacheManager, CacheOutcome, SlotReport};
pub use store::{
    CacheLogRecord, CacheStore, EntryRef, Freshness, LogOp, StoreError, StoredManifest,
};

pub(crate) use deps::unix_nanos;
pub(crate) use lock::{mutex_lock, try_mutex_lock};
