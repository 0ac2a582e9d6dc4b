//! Serve-or-fetch state machine for one cache key.
//!
//! Every attempt first looks at the entry under a shared lock and returns it
//! when it is fresh. Otherwise the lock is traded for an exclusive one, the
//! entry is checked again (another writer may have refreshed it while we
//! waited), and only then is the resource fetched and its record written.
//! Both the "someone else refreshed it" and the "we just refreshed it" cases
//! go back to the shared check, so results are only ever handed out from
//! there and never while an exclusive lock is held.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use url::Url;

use super::connection::MetadataStore;
use super::entries::FreshnessRecord;
use super::fetcher::{FetchOptions, FetchProgress, FetchResponse, Fetcher};
use super::key::CacheKey;
use super::lock::{EntryLock, LockMode};
use crate::Error;
use crate::clock::Clock;

/// Upper bound on shared-check/exclusive-check rounds for one resolve.
pub const MAX_ATTEMPTS: usize = 10;

/// A fresh entry, with a read handle opened while it was known fresh.
#[derive(Debug)]
pub struct ResolvedEntry {
    pub key: CacheKey,
    pub path: PathBuf,
    pub record: FreshnessRecord,
    pub(crate) reader: File,
}

impl ResolvedEntry {
    /// Size of the body behind the read handle.
    pub fn size(&self) -> Result<u64, Error> {
        Ok(self.reader.metadata()?.len())
    }
}

/// What an inspection under lock found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Fresh(FreshnessRecord),
    /// Needs a fetch; carries the existing record, if any.
    Stale(Option<FreshnessRecord>),
    /// Our handle no longer refers to the file at the entry's path.
    Detached,
}

/// Decides between serving cached bytes and fetching.
#[derive(Clone)]
pub struct FetchOrchestrator {
    store: MetadataStore,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    max_bytes: u64,
}

impl FetchOrchestrator {
    pub fn new(store: MetadataStore, fetcher: Arc<dyn Fetcher>, clock: Arc<dyn Clock>, max_bytes: u64) -> Self {
        Self { store, fetcher, clock, max_bytes }
    }

    /// Make sure the entry for `key` is fresh and return it.
    ///
    /// `path` is where the entry's file lives; its parent directories are
    /// created on demand.
    pub async fn resolve(
        &self, url: &Url, key: &CacheKey, path: &Path, options: &FetchOptions,
    ) -> Result<ResolvedEntry, Error> {
        let mut file = open_entry_file(path)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let shared = EntryLock::acquire(file.clone(), LockMode::Shared).await?;
            match self.inspect(&file, path, key).await? {
                EntryState::Fresh(record) => match File::open(path) {
                    Ok(reader) => {
                        drop(shared);
                        tracing::debug!(key = %key, attempt, "Serving cached entry");
                        return Ok(ResolvedEntry { key: key.clone(), path: path.to_path_buf(), record, reader });
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        drop(shared);
                        file = open_entry_file(path)?;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
                EntryState::Detached => {
                    drop(shared);
                    file = open_entry_file(path)?;
                    continue;
                }
                EntryState::Stale(_) => drop(shared),
            }

            let exclusive = Arc::new(EntryLock::acquire(file.clone(), LockMode::Exclusive).await?);
            match self.inspect(&file, path, key).await? {
                EntryState::Fresh(_) => {
                    tracing::debug!(key = %key, attempt, "Entry refreshed by another writer");
                }
                EntryState::Detached => {
                    drop(exclusive);
                    file = open_entry_file(path)?;
                    continue;
                }
                EntryState::Stale(prior) => {
                    self.refresh(url, key, &exclusive, prior, options).await?;
                }
            }
            drop(exclusive);
        }

        tracing::error!(key = %key, attempts = MAX_ATTEMPTS, "Resolve loop exhausted");
        Err(Error::OrchestratorLoopExceeded { key: key.to_string(), attempts: MAX_ATTEMPTS })
    }

    async fn inspect(&self, file: &File, path: &Path, key: &CacheKey) -> Result<EntryState, Error> {
        if !is_linked(file, path)? {
            return Ok(EntryState::Detached);
        }

        let len = file.metadata()?.len();
        let record = self.store.lookup(key.as_str()).await?;

        Ok(match record {
            Some(record) if len > 0 && record.is_fresh(self.clock.now()) => EntryState::Fresh(record),
            other => EntryState::Stale(other),
        })
    }

    /// Fetch `url` into the locked file and stamp a new record.
    ///
    /// Any prior record is dropped before the first byte is written, so an
    /// interrupted write leaves the entry stale.
    async fn refresh(
        &self, url: &Url, key: &CacheKey, lock: &Arc<EntryLock>, prior: Option<FreshnessRecord>,
        options: &FetchOptions,
    ) -> Result<FreshnessRecord, Error> {
        tracing::debug!(key = %key, url = %url, "Fetching stale entry");

        let response = self.fetcher.send(url).await?;
        if !response.is_success() {
            return Err(Error::UpstreamError(format!("{url} returned status {}", response.status)));
        }
        if let Some(len) = response.content_length
            && len > self.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{len} bytes exceeds {}", self.max_bytes)));
        }

        if prior.is_some() {
            self.store.remove(key.as_str()).await?;
        }

        let max_age = response.max_age;
        let written = match self.write_body(lock, response, options).await {
            Ok(0) => {
                discard(key, lock).await;
                return Err(Error::EmptyResourceUnsupported(url.to_string()));
            }
            Ok(written) => written,
            Err(e) => {
                discard(key, lock).await;
                return Err(e);
            }
        };

        let default_age = max_age.map_or(0, saturating_secs);
        let age = options.max_age.map_or(default_age, |d| saturating_secs(d.as_secs()));
        let record = FreshnessRecord { default_age, age, life_start_ts: self.clock.now() };

        if !self.store.update(key.as_str(), record).await? {
            self.store.insert(key.as_str(), record).await?;
        }

        tracing::info!(key = %key, bytes = written, age, default_age, "Stored fetched entry");
        Ok(record)
    }

    /// Stream the body into the locked file from offset 0. Returns the byte
    /// count.
    async fn write_body(
        &self, lock: &Arc<EntryLock>, response: FetchResponse, options: &FetchOptions,
    ) -> Result<u64, Error> {
        let total_bytes = response.content_length;
        let mut body = response.body;

        with_locked_file(lock, |mut file| {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0)).map(drop)
        })
        .await?;

        let mut received = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            if received > self.max_bytes {
                return Err(Error::FetchTooLarge(format!("body exceeds {} bytes", self.max_bytes)));
            }
            with_locked_file(lock, move |mut file| file.write_all(&chunk)).await?;
            options.report(FetchProgress { bytes_received: received, total_bytes });
        }

        with_locked_file(lock, |file| file.sync_data()).await?;
        Ok(received)
    }
}

/// Run blocking work on the locked file from tokio's blocking pool.
///
/// The task holds its own reference to the lock, so a cancelled caller
/// cannot release it while a write is still in flight.
async fn with_locked_file<T, F>(lock: &Arc<EntryLock>, work: F) -> Result<T, Error>
where
    F: FnOnce(&File) -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let lock = lock.clone();
    tokio::task::spawn_blocking(move || work(&**lock.file()))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
        .map_err(Error::from)
}

/// Truncate whatever a failed refresh wrote. Its record is already gone, so
/// the entry is back to an empty file with no record.
async fn discard(key: &CacheKey, lock: &Arc<EntryLock>) {
    if let Err(e) = with_locked_file(lock, |file| file.set_len(0)).await {
        tracing::warn!(key = %key, error = %e, "Failed to truncate entry after failed fetch");
    }
}

fn saturating_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Open (creating if needed) the file backing an entry.
pub(crate) fn open_entry_file(path: &Path) -> Result<Arc<File>, Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", parent.display())))?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(Arc::new)
        .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", path.display())))
}

/// Whether `file` is still the file found at `path`.
pub(crate) fn is_linked(file: &File, path: &Path) -> io::Result<bool> {
    let on_disk = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let held = file.metadata()?;
        Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = (file, on_disk);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fetcher::testing::{MockFetcher, MockResponse};
    use crate::clock::testing::ManualClock;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        _dir: tempfile::TempDir,
        store: MetadataStore,
        fetcher: Arc<MockFetcher>,
        clock: ManualClock,
        orchestrator: FetchOrchestrator,
        path: PathBuf,
        url: Url,
        key: CacheKey,
    }

    async fn harness(response: MockResponse, max_bytes: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open_in_memory().await.unwrap();
        let fetcher = MockFetcher::new(response);
        let clock = ManualClock::at(10_000);
        let orchestrator =
            FetchOrchestrator::new(store.clone(), fetcher.clone(), Arc::new(clock.clone()), max_bytes);
        let url = Url::parse("https://example.com/data/file.bin").unwrap();
        let key = CacheKey::from_url(&url).unwrap();
        let path = dir.path().join(key.relative_path());
        Harness { _dir: dir, store, fetcher, clock, orchestrator, path, url, key }
    }

    impl Harness {
        async fn resolve(&self, options: &FetchOptions) -> Result<ResolvedEntry, Error> {
            self.orchestrator.resolve(&self.url, &self.key, &self.path, options).await
        }
    }

    #[tokio::test]
    async fn test_first_resolve_fetches_and_records() {
        let h = harness(MockResponse::ok(b"payload", Some(60)), 1024).await;

        let entry = h.resolve(&FetchOptions::default()).await.unwrap();

        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(entry.record, FreshnessRecord { default_age: 60, age: 60, life_start_ts: 10_000 });
        assert_eq!(std::fs::read(&h.path).unwrap(), b"payload");
        assert_eq!(h.store.lookup(h.key.as_str()).await.unwrap(), Some(entry.record));
        assert_eq!(entry.size().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_refetch_rewrites_from_start() {
        let h = harness(MockResponse::ok(b"a much longer first body", Some(10)), 1024).await;
        h.resolve(&FetchOptions::default()).await.unwrap();

        h.fetcher.set_response(MockResponse::ok(b"short", Some(10)));
        h.clock.advance(11);
        let entry = h.resolve(&FetchOptions::default()).await.unwrap();

        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(std::fs::read(&h.path).unwrap(), b"short");
        assert_eq!(entry.record.life_start_ts, 10_011);
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_previous_body() {
        let h = harness(MockResponse::ok(b"v1", Some(10)), 1024).await;
        h.resolve(&FetchOptions::default()).await.unwrap();

        let unavailable = MockResponse { status: 503, chunks: vec![b"busy".to_vec()], ..Default::default() };
        h.fetcher.set_response(unavailable);
        h.clock.advance(11);
        let result = h.resolve(&FetchOptions::default()).await;

        assert!(matches!(result, Err(Error::UpstreamError(_))));
        assert_eq!(std::fs::read(&h.path).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_oversized_body_is_discarded() {
        let chunks = vec![vec![1u8; 8], vec![2u8; 8]];
        let h = harness(MockResponse { status: 200, max_age: Some(60), chunks, ..Default::default() }, 12).await;

        let result = h.resolve(&FetchOptions::default()).await;

        assert!(matches!(result, Err(Error::FetchTooLarge(_))));
        assert_eq!(std::fs::metadata(&h.path).unwrap().len(), 0);
        assert!(h.store.lookup(h.key.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_stream_without_length_is_discarded() {
        let chunks = vec![vec![1u8; 8], vec![2u8; 8]];
        let oversized = MockResponse { status: 200, max_age: Some(60), chunks, unknown_length: true, ..Default::default() };
        let h = harness(MockResponse::ok(b"v1", Some(10)), 12).await;
        h.resolve(&FetchOptions::default()).await.unwrap();

        h.fetcher.set_response(oversized);
        h.clock.advance(11);
        let result = h.resolve(&FetchOptions::default()).await;

        assert!(matches!(result, Err(Error::FetchTooLarge(_))));
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(std::fs::metadata(&h.path).unwrap().len(), 0);
        assert!(h.store.lookup(h.key.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_refetch_leaves_entry_stale() {
        let stalled = MockResponse {
            status: 200,
            max_age: Some(60),
            chunks: vec![b"TRUNC".to_vec()],
            unknown_length: true,
            stall: true,
        };
        let h = harness(stalled, 1024).await;
        let fresh = FreshnessRecord { default_age: 60, age: 60, life_start_ts: 10_000 };
        h.store.insert(h.key.as_str(), fresh).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(300), h.resolve(&FetchOptions::default())).await;
        assert!(cancelled.is_err());
        assert!(h.store.lookup(h.key.as_str()).await.unwrap().is_none());

        h.fetcher.set_response(MockResponse::ok(b"full body", Some(60)));
        let entry = tokio::time::timeout(Duration::from_secs(5), h.resolve(&FetchOptions::default()))
            .await
            .expect("lock released after cancellation")
            .unwrap();

        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(std::fs::read(&entry.path).unwrap(), b"full body");
    }

    #[tokio::test]
    async fn test_progress_is_reported_per_chunk() {
        let chunks = vec![b"abc".to_vec(), b"defg".to_vec()];
        let h = harness(MockResponse { status: 200, max_age: None, chunks, ..Default::default() }, 1024).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = FetchOptions::default().progress(move |p| sink.lock().unwrap().push(p.bytes_received));

        h.resolve(&options).await.unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[3, 7]);
    }

    #[tokio::test]
    async fn test_override_age_is_applied() {
        let h = harness(MockResponse::ok(b"x", Some(3_600)), 1024).await;
        let options = FetchOptions::default().max_age(Duration::from_secs(5));

        let entry = h.resolve(&options).await.unwrap();

        assert_eq!(entry.record, FreshnessRecord { default_age: 3_600, age: 5, life_start_ts: 10_000 });
    }

    #[tokio::test]
    async fn test_missing_file_with_fresh_record_refetches() {
        let h = harness(MockResponse::ok(b"v1", Some(60)), 1024).await;
        h.resolve(&FetchOptions::default()).await.unwrap();

        let stale_handle = open_entry_file(&h.path).unwrap();
        std::fs::remove_file(&h.path).unwrap();
        assert!(!is_linked(&stale_handle, &h.path).unwrap());

        let entry = h.resolve(&FetchOptions::default()).await.unwrap();
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(std::fs::read(&entry.path).unwrap(), b"v1");
    }
}
