//! File-backed HTTP resource cache.
//!
//! Response bodies are written to plain files under the cache root while
//! freshness metadata lives in SQLite (async access via tokio-rusqlite).
//!
//! - Keys derived from host, path and query
//! - Whole-file advisory locks coordinate threads and processes
//! - Shared/exclusive lock escalation gives at most one fetch per key
//! - Entries are readable as a stream, a local path, or a packaged URI

pub mod connection;
pub mod entries;
pub mod fetcher;
pub mod key;
pub mod lock;
pub mod migrations;
pub mod orchestrator;
pub mod projector;
pub mod resource_cache;

pub use crate::Error;

pub use connection::MetadataStore;
pub use entries::FreshnessRecord;
pub use fetcher::{BodyStream, FetchOptions, FetchProgress, FetchResponse, Fetcher, ProgressSink, parse_max_age};
pub use key::CacheKey;
pub use lock::{EntryLock, LockMode};
pub use orchestrator::{FetchOrchestrator, ResolvedEntry};
pub use projector::{CachedStream, PackagedLocation};
pub use resource_cache::{ResourceCache, ResourceCacheBuilder};
