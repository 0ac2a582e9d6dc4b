//! Public handle over the resource cache.
//!
//! A `ResourceCache` owns one metadata store and one file tree:
//!
//! ```text
//! <root>/<name>.sqlite   freshness records
//! <root>/<name>/...      one file per cache key
//! ```
//!
//! Several handles, in one process or many, may share the same root.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::connection::{DEFAULT_BUSY_TIMEOUT, MetadataStore};
use super::fetcher::{FetchOptions, Fetcher};
use super::key::{CacheKey, parse_resource_url};
use super::lock::{EntryLock, LockMode};
use super::orchestrator::{FetchOrchestrator, ResolvedEntry, is_linked};
use super::projector::{CachedStream, PackagedLocation, ResultProjector};
use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;

/// Largest body stored when no limit is configured.
const DEFAULT_MAX_BYTES: u64 = 52_428_800;

/// Settings used while opening a [`ResourceCache`].
#[derive(Debug)]
pub struct ResourceCacheBuilder {
    root: PathBuf,
    name: String,
    busy_timeout: Duration,
    max_bytes: u64,
    packaged_locations: Vec<PackagedLocation>,
    clock: Arc<dyn Clock>,
}

impl ResourceCacheBuilder {
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn packaged_locations(mut self, locations: Vec<PackagedLocation>) -> Self {
        self.packaged_locations = locations;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create the directories, open the metadata store and resolve where
    /// the cache root sits.
    pub async fn open(self, fetcher: impl Fetcher + 'static) -> Result<ResourceCache, Error> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(Error::StorageUnavailable(format!("invalid cache name {:?}", self.name)));
        }

        let files_dir = self.root.join(&self.name);
        std::fs::create_dir_all(&files_dir)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", files_dir.display())))?;
        let files_dir = std::fs::canonicalize(&files_dir)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", files_dir.display())))?;

        let root = files_dir.parent().unwrap_or(&files_dir);
        let db_path = root.join(format!("{}.sqlite", self.name));
        let store = MetadataStore::open(&db_path, self.busy_timeout).await?;

        let projector = ResultProjector::new(files_dir, &self.packaged_locations);
        let orchestrator =
            FetchOrchestrator::new(store.clone(), Arc::new(fetcher), self.clock.clone(), self.max_bytes);

        tracing::info!(
            files = %projector.files_dir().display(),
            db = %db_path.display(),
            "Opened resource cache"
        );

        Ok(ResourceCache { store, orchestrator, projector, clock: self.clock })
    }
}

/// File-backed HTTP resource cache.
pub struct ResourceCache {
    store: MetadataStore,
    orchestrator: FetchOrchestrator,
    projector: ResultProjector,
    clock: Arc<dyn Clock>,
}

impl ResourceCache {
    /// Open (creating if needed) the cache `name` under `root`.
    pub async fn create(root: impl AsRef<Path>, name: &str, fetcher: impl Fetcher + 'static) -> Result<Self, Error> {
        Self::builder(root, name).open(fetcher).await
    }

    /// Open the cache described by `config`.
    pub async fn from_config(config: &AppConfig, fetcher: impl Fetcher + 'static) -> Result<Self, Error> {
        Self::builder(&config.root, &config.name)
            .busy_timeout(config.busy_timeout())
            .max_bytes(config.max_bytes)
            .packaged_locations(config.packaged_locations())
            .open(fetcher)
            .await
    }

    pub fn builder(root: impl AsRef<Path>, name: &str) -> ResourceCacheBuilder {
        ResourceCacheBuilder {
            root: root.as_ref().to_path_buf(),
            name: name.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_bytes: DEFAULT_MAX_BYTES,
            packaged_locations: PackagedLocation::platform_defaults(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Directory holding the cached files.
    pub fn files_dir(&self) -> &Path {
        self.projector.files_dir()
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Make sure `uri` is cached and fresh, fetching it if needed.
    pub async fn resolve(&self, uri: &str, options: &FetchOptions) -> Result<ResolvedEntry, Error> {
        let url = parse_resource_url(uri)?;
        let key = CacheKey::from_url(&url)?;
        let path = self.projector.entry_path(&key);
        self.orchestrator.resolve(&url, &key, &path, options).await
    }

    pub async fn fetch(&self, uri: &str) -> Result<CachedStream, Error> {
        self.fetch_with(uri, &FetchOptions::default()).await
    }

    pub async fn fetch_with(&self, uri: &str, options: &FetchOptions) -> Result<CachedStream, Error> {
        let entry = self.resolve(uri, options).await?;
        self.projector.as_stream(entry)
    }

    pub async fn fetch_as_local_path(&self, uri: &str) -> Result<PathBuf, Error> {
        self.fetch_as_local_path_with(uri, &FetchOptions::default()).await
    }

    pub async fn fetch_as_local_path_with(&self, uri: &str, options: &FetchOptions) -> Result<PathBuf, Error> {
        let entry = self.resolve(uri, options).await?;
        self.projector.as_local_path(&entry.key)
    }

    pub async fn fetch_as_packaged_uri(&self, uri: &str) -> Result<String, Error> {
        self.fetch_as_packaged_uri_with(uri, &FetchOptions::default()).await
    }

    /// Like [`fetch_as_local_path_with`](Self::fetch_as_local_path_with) but
    /// returns an `ms-appdata` URI. Fails before fetching when the cache root
    /// is not packaged storage.
    pub async fn fetch_as_packaged_uri_with(&self, uri: &str, options: &FetchOptions) -> Result<String, Error> {
        let key = CacheKey::derive(uri)?;
        let packaged = self.projector.as_packaged_uri(&key)?;
        self.resolve(uri, options).await?;
        Ok(packaged)
    }

    /// Absolute path of the file backing `key`.
    pub fn local_path(&self, key: &CacheKey) -> Result<PathBuf, Error> {
        self.projector.as_local_path(key)
    }

    /// Packaged URI for an entry, if the cache root allows one.
    pub fn packaged_uri(&self, key: &CacheKey) -> Result<String, Error> {
        self.projector.as_packaged_uri(key)
    }

    /// Delete every expired entry whose file can be removed.
    ///
    /// Returns the number of entries removed.
    pub async fn remove_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        let removed = self
            .store
            .sweep_expired(now, |key| self.delete_expired_file(key, now))
            .await?;
        tracing::info!(removed, "Removed expired entries");
        Ok(removed)
    }

    /// Remove the file of an expired entry while holding its exclusive lock.
    ///
    /// Reports false when the entry was refreshed meanwhile or the file
    /// could not be deleted.
    async fn delete_expired_file(&self, key: String, now: i64) -> bool {
        let path = self.projector.entry_path(&CacheKey::from_stored(key.clone()));

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Arc::new(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to open expired entry");
                return false;
            }
        };

        let _lock = match EntryLock::acquire(file.clone(), LockMode::Exclusive).await {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to lock expired entry");
                return false;
            }
        };

        match self.store.lookup(&key).await {
            Ok(Some(record)) if record.is_fresh(now) => return false,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to re-check expired entry");
                return false;
            }
        }

        match is_linked(&file, &path) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to inspect expired entry");
                return false;
            }
        }

        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to delete expired entry");
                false
            }
        }
    }

    /// Delete every cached file and record.
    ///
    /// File removal is best effort: failures are logged and the records are
    /// cleared regardless.
    pub async fn clear(&self) -> Result<(), Error> {
        let files_dir = self.projector.files_dir().to_path_buf();
        let failures = tokio::task::spawn_blocking(move || remove_dir_contents(&files_dir))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?;

        let rows = self.store.clear().await?;
        if failures > 0 {
            tracing::warn!(failures, rows, "Cleared cache with undeletable files left behind");
        } else {
            tracing::info!(rows, "Cleared cache");
        }
        Ok(())
    }
}

/// Remove everything inside `dir`, returning how many removals failed.
fn remove_dir_contents(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to list cache directory");
            return 1;
        }
    };

    let mut failures = 0;
    for entry in entries {
        let result = entry.and_then(|entry| {
            let path = entry.path();
            if entry.file_type()?.is_dir() { std::fs::remove_dir_all(&path) } else { std::fs::remove_file(&path) }
        });
        if let Err(e) = result {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove cached file");
            failures += 1;
        }
    }
    failures
}
