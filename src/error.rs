//! Error types for archive decoding.
//!
//! Only conditions that make an archive (or one extraction request) unusable
//! are errors. Everything else the engine notices while decoding, such as
//! header disagreements, CRC mismatches or unsupported methods, is recorded as
//! a warning on the archive or entry and processing continues.

use std::io;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the decoding engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by an injected byte source (file, HTTP, ...).
    #[error("{0}")]
    Source(#[from] anyhow::Error),

    /// A read asked for bytes past the end of the byte source.
    #[error("read of {length} bytes at offset {offset} exceeds source size {size}")]
    OutOfRange { offset: u64, length: usize, size: u64 },

    /// A binary record failed signature or field validation.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// No ZIP or ARC framing was found anywhere in the source.
    #[error("{0}: not an archive")]
    NotAnArchive(String),

    /// The entry has no usable local header, so its data cannot be found.
    #[error("{0}: data not locatable")]
    NotLocatable(String),

    /// The entry is encrypted and no password was supplied.
    #[error("{0}: password required")]
    NeedsPassword(String),

    /// A filter name matched neither an exception nor a method name.
    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    /// The caller's sink rejected decoded data.
    #[error("sink error: {0}")]
    Sink(anyhow::Error),
}

impl Error {
    /// Returns true for conditions that describe damaged structure rather
    /// than a failing byte source.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::OutOfRange { .. } | Error::Malformed(_))
    }
}
