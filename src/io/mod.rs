//! Byte sources and the random-access cache that sits on top of them.
//!
//! The engine never reads an archive through anything but [`ReadAt`]. The
//! concrete source is chosen by [`ByteSource`]: a local path, an HTTP URL
//! fetched with Range requests, an in-memory buffer (used when reopening a
//! decoded entry as a nested archive), or any caller-supplied reader.

mod cache;
mod http;
mod local;
mod memory;

pub use cache::{ByteCache, CacheStats, DEFAULT_CACHE_SIZE};
pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Where an archive's bytes come from.
#[derive(Clone)]
pub enum ByteSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// An `http://` or `https://` resource read with Range requests.
    Url(String),
    /// Bytes already in memory, e.g. a decoded nested archive.
    Memory(Arc<[u8]>),
    /// Any other reader supplied by the caller.
    Reader(Arc<dyn ReadAt>),
}

impl ByteSource {
    /// Interpret a command-line style locator: URLs become [`ByteSource::Url`],
    /// anything else a path.
    pub fn from_locator(locator: &str) -> Self {
        if is_http_url(locator) {
            ByteSource::Url(locator.to_string())
        } else {
            ByteSource::Path(PathBuf::from(locator))
        }
    }

    /// A short display name used in warnings and errors.
    pub fn display_name(&self) -> String {
        match self {
            ByteSource::Path(path) => path.display().to_string(),
            ByteSource::Url(url) => url.clone(),
            ByteSource::Memory(bytes) => format!("<memory: {} bytes>", bytes.len()),
            ByteSource::Reader(reader) => format!("<reader: {} bytes>", reader.size()),
        }
    }

    /// Open the source, producing the reader the cache will pull from.
    pub async fn open(self) -> Result<Arc<dyn ReadAt>> {
        Ok(match self {
            ByteSource::Path(path) => Arc::new(LocalFileReader::new(&path)?),
            ByteSource::Url(url) => Arc::new(HttpRangeReader::new(url).await?),
            ByteSource::Memory(bytes) => Arc::new(MemoryReader::new(bytes)),
            ByteSource::Reader(reader) => reader,
        })
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteSource({})", self.display_name())
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Memory(bytes.into())
    }
}

impl From<PathBuf> for ByteSource {
    fn from(path: PathBuf) -> Self {
        ByteSource::Path(path)
    }
}

impl From<&str> for ByteSource {
    fn from(locator: &str) -> Self {
        ByteSource::from_locator(locator)
    }
}

/// Check whether a locator names a remote resource.
pub fn is_http_url(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}
