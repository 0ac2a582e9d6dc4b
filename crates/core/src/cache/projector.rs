//! Shapes a resolved entry into what the caller asked for.
//!
//! Three forms are offered: a read-only stream, the absolute path of the
//! backing file, and an `ms-appdata` URI when the cache root lives under a
//! packaged-storage location.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use super::orchestrator::ResolvedEntry;
use crate::Error;

/// URI scheme for packaged-storage addresses.
pub const PACKAGED_URI_SCHEME: &str = "ms-appdata";

/// A storage area whose contents can be addressed by a packaged URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedLocation {
    /// First URI path segment, e.g. `local`.
    pub name: String,
    pub path: PathBuf,
}

impl PackagedLocation {
    /// Temporary, local and roaming data folders of the current user.
    pub fn platform_defaults() -> Vec<Self> {
        let mut locations = vec![Self { name: "temp".into(), path: std::env::temp_dir() }];
        if let Some(path) = dirs::data_local_dir() {
            locations.push(Self { name: "local".into(), path });
        }
        if let Some(path) = dirs::data_dir() {
            locations.push(Self { name: "roaming".into(), path });
        }
        locations
    }
}

/// The packaged location containing the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PackagedRoot {
    name: String,
    /// Cache directory relative to the location.
    relative: PathBuf,
}

/// Find the packaged location closest to `cache_dir`.
///
/// Walks up from the cache directory and stops at the first ancestor that is
/// one of the locations, so the deepest match wins when locations nest.
fn locate_packaged_root(cache_dir: &Path, locations: &[PackagedLocation]) -> Option<PackagedRoot> {
    let canonical: Vec<(&PackagedLocation, PathBuf)> = locations
        .iter()
        .filter_map(|location| Some((location, std::fs::canonicalize(&location.path).ok()?)))
        .collect();

    cache_dir.ancestors().find_map(|ancestor| {
        let (location, root) = canonical.iter().find(|(_, root)| root == ancestor)?;
        let relative = cache_dir.strip_prefix(root).ok()?.to_path_buf();
        Some(PackagedRoot { name: location.name.clone(), relative })
    })
}

/// Turns resolved entries into caller-facing handles.
#[derive(Debug, Clone)]
pub struct ResultProjector {
    files_dir: PathBuf,
    packaged: Option<PackagedRoot>,
}

impl ResultProjector {
    /// `files_dir` must already be canonical.
    pub fn new(files_dir: PathBuf, locations: &[PackagedLocation]) -> Self {
        let packaged = locate_packaged_root(&files_dir, locations);
        match &packaged {
            Some(root) => tracing::debug!(location = %root.name, "Cache root is packaged storage"),
            None => tracing::debug!(root = %files_dir.display(), "Cache root is outside packaged storage"),
        }
        Self { files_dir, packaged }
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Where the file for `key` lives.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.files_dir.join(key.relative_path())
    }

    pub fn as_stream(&self, entry: ResolvedEntry) -> Result<CachedStream, Error> {
        Ok(CachedStream::new(entry.reader, entry.path)?)
    }

    pub fn as_local_path(&self, key: &CacheKey) -> Result<PathBuf, Error> {
        let root = std::fs::canonicalize(&self.files_dir)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {e}", self.files_dir.display())))?;
        Ok(root.join(key.relative_path()))
    }

    pub fn as_packaged_uri(&self, key: &CacheKey) -> Result<String, Error> {
        let root = self
            .packaged
            .as_ref()
            .ok_or_else(|| Error::UnsupportedRootLocation(self.files_dir.display().to_string()))?;

        let mut uri = format!("{PACKAGED_URI_SCHEME}:///{}", root.name);
        for segment in uri_segments(&root.relative).chain(uri_segments(&key.relative_path())) {
            uri.push('/');
            uri.push_str(&segment);
        }
        Ok(uri)
    }
}

fn uri_segments(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|component| match component {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Read-only cursor over a cached file.
///
/// Reads are positional, so every clone keeps its own position while sharing
/// the same open file. The file is closed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct CachedStream {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
    pos: u64,
}

impl CachedStream {
    pub(crate) fn new(file: File, path: PathBuf) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self { file: Arc::new(file), path, len, pos: 0 })
    }

    /// Size of the cached body.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the remaining bytes from the current position.
    pub fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.len.saturating_sub(self.pos) as usize);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for CachedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = read_at(&self.file, &mut buf[..max], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for CachedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.len.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative or overflowing position")
        })?;
        self.pos = target;
        Ok(target)
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}
