//! Decompression method dispatch.
//!
//! A compression method resolves to a [`Codec`]:
//!
//! | Codec | Methods | Implementation |
//! |-------|---------|----------------|
//! | Store | ZIP 0, ARC 1-2 | identity |
//! | Deflate | ZIP 8 | injected [`Inflate`] |
//! | Shrink | ZIP 1 | [`shrink`], LZW with partial clearing |
//! | Reduce | ZIP 2-5 | [`reduce`], follower sets + DLE run copies |
//! | Implode | ZIP 6 | [`implode`], Shannon-Fano coded sliding window |
//! | Pack | ARC 3 | [`arc`], RLE90 |
//! | Squeeze | ARC 4 | [`arc`], Huffman + RLE90 |
//! | CrunchFixed | ARC 5-7 | [`lzw`], hashed 12-bit LZW |
//! | Crunch | ARC 8 | [`lzw`], dynamic 9-12 bit LZW + RLE90 |
//! | Squash | ARC 9 | [`lzw`], dynamic 9-13 bit LZW |
//!
//! Anything else is unsupported. A [`Decoder`] drives one codec over one
//! entry: Store and chunked Deflate decode as input arrives; one-shot Deflate
//! and the legacy codecs collect the entry's compressed bytes and decode them
//! when input ends.

mod arc;
mod bits;
mod implode;
mod lzw;
mod reduce;
mod shrink;

use std::sync::Arc;

use thiserror::Error;

use crate::archive::Method;
use crate::inflate::{Inflate, InflateStream};

/// ZIP general purpose flag: implode used an 8K window.
const FLAG_IMPLODE_8K: u16 = 0x0002;
/// ZIP general purpose flag: implode used three Shannon-Fano trees.
const FLAG_IMPLODE_LITERALS: u16 = 0x0004;

/// Problems found while decoding a compressed stream.
///
/// These never abort an archive; the extractor turns them into entry
/// warnings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of compressed data")]
    UnexpectedEof,

    #[error("invalid code {0}")]
    InvalidCode(u32),

    #[error("invalid code table: {0}")]
    InvalidTable(&'static str),

    #[error("inflate: {0}")]
    Inflate(String),
}

/// How an entry's compressed bytes are turned back into data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Store,
    Deflate,
    Legacy(Legacy),
}

/// Historical methods implemented in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Legacy {
    Shrink,
    Reduce { factor: u8 },
    Implode { large_window: bool, literal_tree: bool },
    Pack,
    Squeeze,
    CrunchFixed { rle: bool, new_hash: bool },
    Crunch,
    Squash,
}

impl Codec {
    /// Resolve a method (and its ZIP flag bits) to a codec, or `None` when
    /// the method is unsupported.
    pub fn for_method(method: Method, flags: u16) -> Option<Codec> {
        match method {
            Method::Zip(0) => Some(Codec::Store),
            Method::Zip(1) => Some(Codec::Legacy(Legacy::Shrink)),
            Method::Zip(m @ 2..=5) => Some(Codec::Legacy(Legacy::Reduce { factor: (m - 1) as u8 })),
            Method::Zip(6) => Some(Codec::Legacy(Legacy::Implode {
                large_window: flags & FLAG_IMPLODE_8K != 0,
                literal_tree: flags & FLAG_IMPLODE_LITERALS != 0,
            })),
            Method::Zip(8) => Some(Codec::Deflate),
            Method::Zip(_) => None,
            Method::Arc(1 | 2) => Some(Codec::Store),
            Method::Arc(3) => Some(Codec::Legacy(Legacy::Pack)),
            Method::Arc(4) => Some(Codec::Legacy(Legacy::Squeeze)),
            Method::Arc(5) => Some(Codec::Legacy(Legacy::CrunchFixed {
                rle: false,
                new_hash: false,
            })),
            Method::Arc(6) => Some(Codec::Legacy(Legacy::CrunchFixed {
                rle: true,
                new_hash: false,
            })),
            Method::Arc(7) => Some(Codec::Legacy(Legacy::CrunchFixed {
                rle: true,
                new_hash: true,
            })),
            Method::Arc(8) => Some(Codec::Legacy(Legacy::Crunch)),
            Method::Arc(9) => Some(Codec::Legacy(Legacy::Squash)),
            Method::Arc(_) => None,
        }
    }
}

impl Legacy {
    /// Decode a complete compressed stream, appending at most `size` bytes
    /// to `out`. On error, `out` holds whatever was decoded before it.
    pub fn decode(self, input: &[u8], size: usize, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        let result = match self {
            Legacy::Shrink => shrink::unshrink(input, size, out),
            Legacy::Reduce { factor } => reduce::expand(input, size, factor, out),
            Legacy::Implode {
                large_window,
                literal_tree,
            } => implode::explode(input, size, large_window, literal_tree, out),
            Legacy::Pack => arc::unpack(input, size, out),
            Legacy::Squeeze => arc::unsqueeze(input, size, out),
            Legacy::CrunchFixed { rle, new_hash } => {
                lzw::uncrunch_fixed(input, size, rle, new_hash, out)
            }
            Legacy::Crunch => lzw::uncrunch(input, size, false, out),
            Legacy::Squash => lzw::uncrunch(input, size, true, out),
        };
        out.truncate(size);
        result
    }
}

enum DecoderState {
    Store,
    Stream(Box<dyn InflateStream>),
    Buffered(Vec<u8>),
}

/// Drives one codec over one entry's compressed stream.
pub struct Decoder {
    codec: Codec,
    inflater: Arc<dyn Inflate>,
    state: DecoderState,
    size: usize,
}

impl Decoder {
    pub fn new(codec: Codec, inflater: Arc<dyn Inflate>, size: usize) -> Self {
        let state = match codec {
            Codec::Store => DecoderState::Store,
            Codec::Deflate => match inflater.stream() {
                Some(stream) => DecoderState::Stream(stream),
                None => DecoderState::Buffered(Vec::new()),
            },
            Codec::Legacy(_) => DecoderState::Buffered(Vec::new()),
        };
        Self {
            codec,
            inflater,
            state,
            size,
        }
    }

    /// Feed the next chunk of (decrypted) compressed bytes.
    pub async fn push(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<(), DecodeError> {
        match &mut self.state {
            DecoderState::Store => out.extend_from_slice(chunk),
            DecoderState::Stream(stream) => stream
                .push(chunk, out)
                .await
                .map_err(|e| DecodeError::Inflate(e.to_string()))?,
            DecoderState::Buffered(input) => input.extend_from_slice(chunk),
        }
        Ok(())
    }

    /// Signal end of input, appending any remaining output.
    pub async fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        match &mut self.state {
            DecoderState::Store => Ok(()),
            DecoderState::Stream(stream) => stream
                .finish(out)
                .await
                .map_err(|e| DecodeError::Inflate(e.to_string())),
            DecoderState::Buffered(input) => {
                let input = std::mem::take(input);
                match self.codec {
                    Codec::Legacy(legacy) => legacy.decode(&input, self.size, out),
                    _ => {
                        let data = self
                            .inflater
                            .inflate(&input, self.size)
                            .await
                            .map_err(|e| DecodeError::Inflate(e.to_string()))?;
                        out.extend_from_slice(&data);
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Copy `length` bytes from `distance` bytes back, stopping at `limit`.
///
/// Bytes before the start of the output read as zero.
fn copy_match(out: &mut Vec<u8>, distance: usize, length: usize, limit: usize) {
    for _ in 0..length {
        if out.len() >= limit {
            break;
        }
        let byte = if distance <= out.len() {
            out[out.len() - distance]
        } else {
            0
        };
        out.push(byte);
    }
}
