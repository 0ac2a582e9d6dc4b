//! Cache key derivation and its mapping onto the file tree.
//!
//! A key is `host + path`, with `'@' + query` appended when the URL has a
//! query string. Each `/` in the key becomes a directory level below the
//! cache root.

use std::fmt;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use url::Url;

use crate::Error;

/// Longest key segment stored verbatim as a file or directory name.
const MAX_SEGMENT_BYTES: usize = 200;

/// Marks a hashed path segment. Literal segments starting with it are
/// hashed too, so the two forms can never collide.
const HASHED_SEGMENT_PREFIX: char = '~';

/// Identifies one cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse `input` and derive its key in one step.
    ///
    /// Fails with `InvalidScheme` for anything but http(s) and with
    /// `PathIsDirectory` when the path ends in `/`.
    pub fn derive(input: &str) -> Result<Self, Error> {
        let url = parse_resource_url(input)?;
        Self::from_url(&url)
    }

    /// Derive the key for an already-parsed URL.
    ///
    /// A literal `@` in the path is written as `%40`, so `/x@y` and `/x%40y`
    /// name the same entry.
    pub fn from_url(url: &Url) -> Result<Self, Error> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url} has no host")))?
            .to_lowercase();

        let path = url.path();
        if path.ends_with('/') {
            return Err(Error::PathIsDirectory(url.to_string()));
        }

        let mut key = match url.port() {
            Some(port) => format!("{host}+{port}"),
            None => host,
        };
        // '@' separates the query, so a literal one in the path is escaped.
        key.push_str(&path.replace('@', "%40"));

        if let Some(query) = url.query()
            && !query.is_empty()
        {
            key.push('@');
            key.push_str(query);
        }

        Ok(Self(key))
    }

    /// Rebuild a key read back from the metadata store.
    pub(crate) fn from_stored(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative location of the entry's file below the cache directory.
    pub fn relative_path(&self) -> PathBuf {
        self.0.split('/').map(path_segment).collect()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse a resource URL for caching.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Parse (the url crate lowercases the host and resolves dot segments)
/// 3. Remove fragment (#...)
/// 4. Keep query string intact (do not reorder)
pub fn parse_resource_url(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty URL".into()));
    }

    let mut parsed = Url::parse(trimmed).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;
    parsed.set_fragment(None);

    Ok(parsed)
}

fn path_segment(segment: &str) -> String {
    let needs_hash = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.len() > MAX_SEGMENT_BYTES
        || segment.starts_with(HASHED_SEGMENT_PREFIX);

    if needs_hash {
        let digest = Sha256::digest(segment.as_bytes());
        format!("{HASHED_SEGMENT_PREFIX}{}", hex::encode(digest))
    } else {
        segment.to_string()
    }
}
