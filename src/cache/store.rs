//! On-disk cache store.
//!
//! Each entry is a content file plus a JSON manifest holding the entry's
//! dependencies and write time. Both are replaced through tempfile renames, and
//! the manifest is always written last: an entry without a manifest is never
//! usable.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use crate::domain::CacheMode;

use super::config::CacheConfig;
use super::deps::{Dependency, DependencyManifest, DependencyResolver, unix_nanos};
use super::keys::CacheKey;
use super::lock::BuildLocks;

const SOURCE: &str = "cache::store";
const MANIFEST_EXTENSION: &str = "deps.json";
const LOG_FILE: &str = "cache.log";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to prepare cache directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed cache manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reference to a stored entry: its key and the MIME-derived file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    key: CacheKey,
    extension: String,
}

impl EntryRef {
    pub fn new(key: CacheKey, extension: &str) -> Self {
        let extension: String = extension
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let extension = if extension.is_empty() {
            "bin".to_string()
        } else {
            extension
        };
        Self { key, extension }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// Manifest persisted next to each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredManifest {
    pub key: CacheKey,
    pub extension: String,
    pub written_at_ns: i128,
    pub dependencies: DependencyManifest,
}

impl StoredManifest {
    pub fn written_at(&self) -> SystemTime {
        if self.written_at_ns >= 0 {
            UNIX_EPOCH + Duration::from_nanos(self.written_at_ns as u64)
        } else {
            UNIX_EPOCH
        }
    }

    /// Token that changes whenever the entry is rewritten.
    pub fn buster(&self) -> String {
        format!("{:x}", self.written_at_ns)
    }

    fn age(&self) -> Duration {
        let age = unix_nanos(SystemTime::now()) - self.written_at_ns;
        if age <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(u64::try_from(age).unwrap_or(u64::MAX))
        }
    }
}

/// Outcome of a freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh(StoredManifest),
    /// No content file on disk.
    Missing,
    /// Content exists but its manifest is missing or unreadable.
    NoManifest,
    /// Older than the requested mode's maximum age.
    Expired { age: Duration },
    /// A recorded dependency no longer matches.
    Changed(Dependency),
}

impl Freshness {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Missing => "missing",
            Self::NoManifest => "no_manifest",
            Self::Expired { .. } => "expired",
            Self::Changed(_) => "dependency_changed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOp {
    Write,
    Remove,
    Clear,
}

/// One line of the store's JSON-lines cache log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLogRecord {
    pub at: String,
    pub op: LogOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// Filesystem-backed store keyed by cache key digest.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    locks: BuildLocks,
}

impl CacheStore {
    /// Open a store rooted at `root`, creating the directory if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Init {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            locks: BuildLocks::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn locks(&self) -> &BuildLocks {
        &self.locks
    }

    pub fn content_path(&self, entry: &EntryRef) -> PathBuf {
        let digest = entry.key.digest();
        self.shard(&digest)
            .join(format!("{digest}.{}", entry.extension))
    }

    pub fn manifest_path(&self, key: &CacheKey) -> PathBuf {
        let digest = key.digest();
        self.shard(&digest)
            .join(format!("{digest}.{MANIFEST_EXTENSION}"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    fn shard(&self, digest: &str) -> PathBuf {
        self.root.join(&digest[..2])
    }

    pub fn exists(&self, entry: &EntryRef) -> bool {
        self.content_path(entry).is_file()
    }

    /// Read an entry's content; `None` when it was never written or was removed.
    pub fn read(&self, entry: &EntryRef) -> Result<Option<Bytes>, StoreError> {
        let path = self.content_path(entry);
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    pub fn read_manifest(&self, key: &CacheKey) -> Result<Option<StoredManifest>, StoreError> {
        let path = self.manifest_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Manifest { path, source })
    }

    /// Decide whether an entry may be served for the requested mode.
    ///
    /// Usable iff the content exists, a manifest exists, the entry's age is
    /// within the mode's maximum age, and every recorded dependency is unchanged.
    pub fn freshness(
        &self,
        entry: &EntryRef,
        mode: CacheMode,
        config: &CacheConfig,
        resolver: &dyn DependencyResolver,
    ) -> Freshness {
        let freshness = self.evaluate(entry, mode, config, resolver);
        debug!(
            op = "store::freshness",
            cache_key = %entry.key,
            cache_mode = %mode,
            result = freshness.reason(),
            "evaluated cache entry"
        );
        freshness
    }

    fn evaluate(
        &self,
        entry: &EntryRef,
        mode: CacheMode,
        config: &CacheConfig,
        resolver: &dyn DependencyResolver,
    ) -> Freshness {
        if !self.exists(entry) {
            return Freshness::Missing;
        }

        let manifest = match self.read_manifest(&entry.key) {
            Ok(Some(manifest)) if manifest.key == entry.key => manifest,
            Ok(_) => return Freshness::NoManifest,
            Err(err) => {
                warn!(
                    op = "store::freshness",
                    target_module = SOURCE,
                    cache_key = %entry.key,
                    error = %err,
                    "Unreadable cache manifest; treating entry as stale"
                );
                return Freshness::NoManifest;
            }
        };

        if let Some(max_age) = config.max_age(mode) {
            let age = manifest.age();
            if age >= max_age {
                return Freshness::Expired { age };
            }
        }

        if let Some(changed) = manifest.dependencies.first_stale(resolver) {
            return Freshness::Changed(changed.clone());
        }

        Freshness::Fresh(manifest)
    }

    pub fn is_usable(
        &self,
        entry: &EntryRef,
        mode: CacheMode,
        config: &CacheConfig,
        resolver: &dyn DependencyResolver,
    ) -> bool {
        self.freshness(entry, mode, config, resolver).is_usable()
    }

    /// Persist content and manifest and record the write in the cache log.
    pub fn write(
        &self,
        entry: &EntryRef,
        content: &[u8],
        dependencies: DependencyManifest,
    ) -> Result<StoredManifest, StoreError> {
        self.persist(entry, content, dependencies, true)
    }

    /// Persist without a cache-log line (used for entries that depend on the log itself).
    pub fn write_unlogged(
        &self,
        entry: &EntryRef,
        content: &[u8],
        dependencies: DependencyManifest,
    ) -> Result<StoredManifest, StoreError> {
        self.persist(entry, content, dependencies, false)
    }

    fn persist(
        &self,
        entry: &EntryRef,
        content: &[u8],
        dependencies: DependencyManifest,
        log: bool,
    ) -> Result<StoredManifest, StoreError> {
        let started_at = Instant::now();
        let content_path = self.content_path(entry);
        let manifest_path = self.manifest_path(&entry.key);
        let directory = self.shard(&entry.key.digest());
        fs::create_dir_all(&directory).map_err(|err| StoreError::io(&directory, err))?;

        let previous = self.read_manifest(&entry.key).ok().flatten();
        remove_if_exists(&manifest_path)?;
        persist_atomically(&directory, &content_path, content)?;

        let mut written_at_ns = unix_nanos(SystemTime::now());
        if let Some(previous) = previous
            && previous.written_at_ns >= written_at_ns
        {
            written_at_ns = previous.written_at_ns + 1;
        }

        let manifest = StoredManifest {
            key: entry.key.clone(),
            extension: entry.extension.clone(),
            written_at_ns,
            dependencies,
        };
        let encoded = serde_json::to_vec_pretty(&manifest).map_err(|source| {
            StoreError::Manifest {
                path: manifest_path.clone(),
                source,
            }
        })?;
        persist_atomically(&directory, &manifest_path, &encoded)?;

        if log {
            self.append_log(LogOp::Write, Some(&entry.key), Some(content.len() as u64));
        }

        info!(
            op = "store::write",
            result = "stored",
            cache_key = %entry.key,
            bytes = content.len(),
            dependencies = manifest.dependencies.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Cache entry written"
        );
        Ok(manifest)
    }

    /// Remove an entry. The manifest goes first so a partial removal is never usable.
    pub fn remove(&self, entry: &EntryRef) -> Result<(), StoreError> {
        remove_if_exists(&self.manifest_path(&entry.key))?;
        remove_if_exists(&self.content_path(entry))?;
        self.append_log(LogOp::Remove, Some(&entry.key), None);
        debug!(op = "store::remove", cache_key = %entry.key, "Cache entry removed");
        Ok(())
    }

    /// Drop every entry (external cache-clear operation).
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&self.root, err)),
        }
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Init {
            path: self.root.clone(),
            source,
        })?;
        self.append_log(LogOp::Clear, None, None);
        info!(op = "store::clear", root = %self.root.display(), "Cache cleared");
        Ok(())
    }

    /// The last `limit` records of the cache log, oldest first.
    pub fn read_log(&self, limit: usize) -> Result<Vec<CacheLogRecord>, StoreError> {
        let path = self.log_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        let records: Vec<CacheLogRecord> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }

    fn append_log(&self, op: LogOp, key: Option<&CacheKey>, bytes: Option<u64>) {
        let record = CacheLogRecord {
            at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            op,
            key: key.map(|key| key.as_str().to_string()),
            bytes,
        };
        let path = self.log_path();
        let result = serde_json::to_string(&record)
            .map_err(io::Error::other)
            .and_then(|mut line| {
                line.push('\n');
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?
                    .write_all(line.as_bytes())
            });
        if let Err(err) = result {
            warn!(
                op = "store::append_log",
                target_module = SOURCE,
                path = %path.display(),
                error = %err,
                "Failed to append cache log record"
            );
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

fn persist_atomically(directory: &Path, target: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut file = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(directory)
        .map_err(|err| StoreError::io(directory, err))?;
    let temp_path = file.path().to_path_buf();
    file.write_all(content)
        .map_err(|err| StoreError::io(&temp_path, err))?;
    file.flush().map_err(|err| StoreError::io(&temp_path, err))?;
    file.persist(target)
        .map_err(|err| StoreError::io(target, err.error))?;
    Ok(())
}
