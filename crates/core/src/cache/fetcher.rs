//! The network side of the cache.
//!
//! The cache never talks HTTP itself; it asks a [`Fetcher`] for a status,
//! the response's `max-age` and a body stream. `hoard-client` provides the
//! reqwest implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use url::Url;

use crate::Error;

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, Error>>;

/// Response from a fetch operation.
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// `max-age` from Cache-Control, in seconds
    pub max_age: Option<u64>,
    /// Content-Length, when the server sent one
    pub content_length: Option<u64>,
    /// Response body
    pub body: BodyStream,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("max_age", &self.max_age)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Issues GET requests on behalf of the cache.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn send(&self, url: &Url) -> Result<FetchResponse, Error>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn send(&self, url: &Url) -> Result<FetchResponse, Error> {
        (**self).send(url).await
    }
}

/// Download progress for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
}

/// Receives progress updates while a body is being written.
pub type ProgressSink = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Per-call knobs for a cache fetch.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Freshness window to apply instead of the server's `max-age`.
    pub max_age: Option<Duration>,
    pub progress: Option<ProgressSink>,
}

impl FetchOptions {
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn progress(mut self, sink: impl Fn(FetchProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    pub(crate) fn report(&self, progress: FetchProgress) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("max_age", &self.max_age)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Extract `max-age` from a Cache-Control header value.
///
/// Directive names are case-insensitive and the value may be quoted.
/// Malformed values are ignored.
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value.trim().trim_matches('"').parse().ok()
    })
}
