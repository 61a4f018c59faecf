//! Injected standard Deflate decoding.
//!
//! Deflate is the one method the engine does not implement itself. Hosts
//! supply an [`Inflate`] implementation; some can only decode a whole buffer
//! at once, others can decode chunk by chunk, so the trait offers both and
//! the dispatcher uses whichever is available. [`FlateInflater`] is the
//! default, backed by `flate2`.

use std::io::Read;

use anyhow::{Result, bail};
use async_trait::async_trait;
use flate2::read::DeflateDecoder;
use flate2::{Decompress, FlushDecompress, Status};

/// A raw (headerless) Deflate decoder.
#[async_trait]
pub trait Inflate: Send + Sync {
    /// Decode a complete raw Deflate stream in one call. `size_hint` is the
    /// declared size; implementations may stop shortly after it.
    async fn inflate(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>>;

    /// Start a chunked decode, if this implementation supports it.
    fn stream(&self) -> Option<Box<dyn InflateStream>> {
        None
    }
}

/// Chunk-by-chunk Deflate decoding.
#[async_trait]
pub trait InflateStream: Send {
    /// Feed the next compressed chunk, appending any decoded bytes to `out`.
    async fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Signal end of input and flush remaining output.
    async fn finish(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

/// Which calling convention [`FlateInflater`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InflateMode {
    /// Only whole-buffer decoding.
    OneShot,
    /// Whole-buffer and chunked decoding.
    #[default]
    Chunked,
}

/// `flate2`-backed [`Inflate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlateInflater {
    mode: InflateMode,
}

impl FlateInflater {
    pub fn new(mode: InflateMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Inflate for FlateInflater {
    async fn inflate(&self, data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(size_hint.min(OUTPUT_RESERVE * 32));
        // One byte past the hint is enough to show an overrun
        let limit = (size_hint as u64).saturating_add(1);
        DeflateDecoder::new(data).take(limit).read_to_end(&mut out)?;
        Ok(out)
    }

    fn stream(&self) -> Option<Box<dyn InflateStream>> {
        match self.mode {
            InflateMode::OneShot => None,
            InflateMode::Chunked => Some(Box::new(FlateStream::new())),
        }
    }
}

const OUTPUT_RESERVE: usize = 32 * 1024;

struct FlateStream {
    inner: Decompress,
    done: bool,
}

impl FlateStream {
    fn new() -> Self {
        Self {
            inner: Decompress::new(false),
            done: false,
        }
    }

    fn run(&mut self, mut input: &[u8], out: &mut Vec<u8>, flush: FlushDecompress) -> Result<()> {
        while !self.done {
            if out.capacity() - out.len() < OUTPUT_RESERVE / 4 {
                out.reserve(OUTPUT_RESERVE);
            }
            let in_before = self.inner.total_in();
            let out_before = self.inner.total_out();
            let status = self.inner.decompress_vec(input, out, flush)?;
            let consumed = (self.inner.total_in() - in_before) as usize;
            let produced = self.inner.total_out() - out_before;
            input = &input[consumed..];
            if status == Status::StreamEnd {
                self.done = true;
            } else if consumed == 0 && produced == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InflateStream for FlateStream {
    async fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.run(chunk, out, FlushDecompress::None)
    }

    async fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        self.run(&[], out, FlushDecompress::Finish)?;
        if !self.done {
            bail!("deflate stream ended early");
        }
        Ok(())
    }
}
