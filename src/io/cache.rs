//! Single-window read cache.
//!
//! Archive access is overwhelmingly forward-sequential, with occasional jumps
//! back to revisit a local header, so one resident window is enough. A read
//! that misses the window repositions it at the requested offset (plus
//! read-ahead). A read that starts inside the window but runs past its end
//! keeps the overlapping bytes and performs a single extension read.
//!
//! The default window is 64 KiB, which is at least as large as any
//! non-payload structure an archive may contain (a comment can be up to
//! 64 KiB - 1 bytes), so no structural read needs more than one miss.

use std::sync::Arc;

use tracing::trace;

use super::ReadAt;
use crate::error::{Error, Result};

/// Default window size in bytes.
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024;

/// Smallest window the cache will use, whatever the caller asks for.
const MIN_CACHE_SIZE: usize = 512;

/// Counters describing how reads were served.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub extensions: u64,
}

/// Bounded random-access reader over an archive's bytes.
pub struct ByteCache {
    reader: Arc<dyn ReadAt>,
    size: u64,
    window_size: usize,
    base: u64,
    window: Vec<u8>,
    stats: CacheStats,
}

impl ByteCache {
    pub fn new(reader: Arc<dyn ReadAt>, window_size: usize) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            window_size: window_size.max(MIN_CACHE_SIZE),
            base: 0,
            window: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Total size of the underlying source.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Return exactly `length` bytes starting at `offset`.
    ///
    /// Fails with [`Error::OutOfRange`] when the range extends past the end
    /// of the source (or the source delivers fewer bytes than it claimed).
    pub async fn read(&mut self, offset: u64, length: usize) -> Result<&[u8]> {
        let out_of_range = Error::OutOfRange {
            offset,
            length,
            size: self.size,
        };
        let end = match offset.checked_add(length as u64) {
            Some(end) if end <= self.size => end,
            _ => return Err(out_of_range),
        };
        if length == 0 {
            return Ok(&[]);
        }

        let window_end = self.base + self.window.len() as u64;
        if offset >= self.base && end <= window_end {
            self.stats.hits += 1;
        } else if offset >= self.base && offset < window_end {
            self.stats.extensions += 1;
            let keep_from = (offset - self.base) as usize;
            self.window.drain(..keep_from);
            self.base = offset;
            let have = self.window.len();
            self.window.resize(self.span(offset, length), 0);
            trace!(offset, length, kept = have, "cache extension");
            self.fill(have).await?;
        } else {
            self.stats.misses += 1;
            self.base = offset;
            self.window.clear();
            self.window.resize(self.span(offset, length), 0);
            trace!(offset, length, "cache miss");
            self.fill(0).await?;
        }

        let start = (offset - self.base) as usize;
        if start + length > self.window.len() {
            return Err(out_of_range);
        }
        Ok(&self.window[start..start + length])
    }

    /// Number of bytes the window should hold when positioned at `offset`.
    fn span(&self, offset: u64, length: usize) -> usize {
        (self.window_size.max(length) as u64).min(self.size - offset) as usize
    }

    /// Fill `window[from..]` from the source, truncating on a short source.
    async fn fill(&mut self, from: usize) -> Result<()> {
        let mut filled = from;
        while filled < self.window.len() {
            let n = self
                .reader
                .read_at(self.base + filled as u64, &mut self.window[filled..])
                .await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.window.truncate(filled);
        Ok(())
    }
}
