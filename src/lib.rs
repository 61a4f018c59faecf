//! # dearc
//!
//! A decoding engine for legacy ZIP and ARC archives, with directory
//! reconciliation and the historical compression methods.
//!
//! Archives from old bulletin boards and shareware disks are often damaged
//! or written by tools with their own ideas about the format. This library
//! reads them through a small random-access cache (local files, HTTP Range
//! requests or memory), reconciles the central directory against the local
//! headers actually present, decodes entries with the method they were
//! written with, and reports every anomaly as a warning instead of giving up.
//!
//! ## Features
//!
//! - ZIP (including ZIP64 records and prefixed self-extractors) and ARC
//! - Directory-trusted and directory-bypass (scan) reconciliation
//! - Stored, Shrink, Reduce 1-4, Implode, Deflate (injectable)
//! - ARC Store, Pack, Squeeze, Crunch (all variants) and Squash
//! - Traditional PKWARE decryption and ARC password garbling
//! - CRC-32 / CRC-16 verification, nested archive reopening
//!
//! ## Example
//!
//! ```no_run
//! use dearc::{Archive, EntryFilter, OpenOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut archive = Archive::open("https://example.com/GAMES.ZIP", OpenOptions::default()).await?;
//!
//!     let mut entries = archive.read_directory(&EntryFilter::default()).await?;
//!     for entry in &mut entries {
//!         let data = archive.read_file(entry, None).await?;
//!         println!("{} {} bytes {}", entry.name(), data.len(), entry.warnings());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod inflate;
pub mod io;

pub use archive::{
    Archive, ArchiveKind, Entry, EntryFilter, Exception, Exceptions, Method, OpenOptions, Sink,
    WarningLog,
};
pub use error::{Error, Result};
pub use inflate::{FlateInflater, Inflate, InflateMode};
pub use io::{ByteSource, HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
