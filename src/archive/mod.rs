//! Archive handles: container detection, directory reconciliation and entry
//! extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: binary record layouts (EOCD, directory records, local
//!   headers, ARC headers)
//! - [`parser`]: record reads through the archive's byte cache
//! - [`reconcile`]: pairing directory records with local headers, or
//!   scanning for local headers when the directory is not trusted
//! - [`extractor`]: decryption, decoding and integrity checks for one entry
//! - [`model`] and [`filter`]: what callers see and how they select it
//!
//! ## Lifecycle
//!
//! [`Archive::open`] detects the container, [`Archive::read_directory`]
//! reconciles and filters the entry list, [`Archive::read_file`] decodes one
//! entry, and [`Archive::open_nested`] reopens decoded bytes that are
//! themselves an archive. Problems that leave the archive usable are
//! recorded as warnings on the archive or entry rather than returned as
//! errors.

mod crypto;
mod extractor;
mod filter;
mod model;
mod parser;
mod reconcile;
mod structures;

#[cfg(test)]
mod tests;

pub use extractor::{CHUNK_SIZE, Sink};
pub use filter::{EntryFilter, NO_METHOD_FILTER, glob_match};
pub use model::{
    ARC_METHOD_NAMES, ATTR_DIRECTORY, ATTR_VOLUME, ArchiveKind, Entry, Exception, Exceptions,
    Header, Method, WarningLog, ZIP_METHOD_NAMES, parse_method_filter,
};

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::inflate::{FlateInflater, Inflate};
use crate::io::{ByteCache, ByteSource, CacheStats, DEFAULT_CACHE_SIZE};
use extractor::Extraction;
use parser::{EocdLocation, Parser};
use structures::{ARC_MARKER, EndOfCentralDirectory, LFH_SIGNATURE, SPAN_SIGNATURES, decode_text};

/// Settings applied when opening an archive. Nested archives inherit them.
#[derive(Clone)]
pub struct OpenOptions {
    /// Cache window size in bytes.
    pub cache_size: usize,
    /// Password for encrypted ZIP entries and garbled ARC entries.
    pub password: Option<Vec<u8>>,
    /// Ignore the central directory and scan for local headers.
    pub nodirs: bool,
    /// Scan for local headers when the central directory cannot be read.
    pub scan_fallback: bool,
    /// The kind the caller expects, usually from the file extension. When
    /// unset, the source name's extension is used.
    pub kind_hint: Option<ArchiveKind>,
    /// Deflate implementation.
    pub inflater: Arc<dyn Inflate>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            password: None,
            nodirs: false,
            scan_fallback: false,
            kind_hint: None,
            inflater: Arc::new(FlateInflater::default()),
        }
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("cache_size", &self.cache_size)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("nodirs", &self.nodirs)
            .field("scan_fallback", &self.scan_fallback)
            .field("kind_hint", &self.kind_hint)
            .finish_non_exhaustive()
    }
}

/// An open archive.
pub struct Archive {
    name: String,
    kind: ArchiveKind,
    cache: ByteCache,
    options: OpenOptions,
    eocd: Option<EocdLocation>,
    comment: Option<String>,
    warnings: WarningLog,
    exceptions: Exceptions,
    entries: Option<Vec<Entry>>,
}

impl Archive {
    /// Open a byte source and detect its container kind.
    ///
    /// Fails only when the source cannot be opened or holds neither ZIP nor
    /// ARC framing.
    pub async fn open(source: impl Into<ByteSource>, options: OpenOptions) -> Result<Archive> {
        let source = source.into();
        let name = source.display_name();
        let reader = source.clone().open().await.map_err(Error::Source)?;
        let mut cache = ByteCache::new(reader, options.cache_size);
        let mut exceptions = Exceptions::empty();

        let mut parser = Parser::new(&mut cache);
        let head = parser.read_clamped(0, 4).await?.to_vec();
        let kind = if head.starts_with(LFH_SIGNATURE)
            || head.starts_with(EndOfCentralDirectory::SIGNATURE)
        {
            ArchiveKind::Zip
        } else if SPAN_SIGNATURES.iter().any(|s| head.starts_with(s)) {
            exceptions.insert(Exception::Split);
            ArchiveKind::Zip
        } else if head.len() >= 2 && head[0] == ARC_MARKER && parser.read_arc(0).await.is_ok() {
            ArchiveKind::Arc
        } else {
            ArchiveKind::Zip
        };

        let eocd = match kind {
            ArchiveKind::Zip => parser.find_eocd().await?,
            ArchiveKind::Arc => None,
        };
        // A local header or spanning marker at the start is enough to go on
        // without an EOCD; anything else needs one
        let framed = head.starts_with(LFH_SIGNATURE) || exceptions.contains(Exception::Split);
        if kind == ArchiveKind::Zip && eocd.is_none() && !framed {
            return Err(Error::NotAnArchive(name));
        }

        let comment = eocd
            .as_ref()
            .filter(|location| !location.comment.is_empty())
            .map(|location| decode_text(&location.comment, false));
        if comment.is_some() {
            exceptions.insert(Exception::Banner);
        }
        if let Some(location) = &eocd {
            if location.eocd.is_split() {
                exceptions.insert(Exception::Split);
            }
        }

        let hint = options.kind_hint.or_else(|| match &source {
            ByteSource::Path(_) | ByteSource::Url(_) => ArchiveKind::from_extension(&name),
            _ => None,
        });
        if hint.is_some_and(|hint| hint != kind) {
            exceptions.insert(Exception::WrongType);
        }
        if options.nodirs {
            exceptions.insert(Exception::NoDirs);
        }

        debug!(
            archive = %name,
            %kind,
            size = cache.size(),
            eocd = eocd.as_ref().map(|l| l.offset),
            exceptions = exceptions.bits(),
            "archive opened"
        );

        Ok(Archive {
            name,
            kind,
            cache,
            options,
            eocd,
            comment,
            warnings: WarningLog::new(),
            exceptions,
            entries: None,
        })
    }

    /// Display name of the byte source (or, for nested archives, the entry).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// The archive banner (ZIP archive comment), if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    pub fn exceptions(&self) -> Exceptions {
        self.exceptions
    }

    /// Raise an exception flag from outside, e.g. a driver that judges the
    /// archive by its own criteria. Flags are never cleared.
    pub fn set_exception(&mut self, exception: Exception) {
        self.exceptions.insert(exception);
    }

    /// The full reconciled list, once [`read_directory`](Self::read_directory)
    /// has run.
    pub fn entries(&self) -> Option<&[Entry]> {
        self.entries.as_deref()
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Reconcile the archive's entries (once) and return those passing
    /// `filter`, in archive order.
    pub async fn read_directory(&mut self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        if self.entries.is_none() {
            let entries = self.reconcile().await?;
            self.entries = Some(entries);
        }
        let entries = self.entries.as_deref().unwrap_or_default();
        Ok(entries
            .iter()
            .filter(|entry| filter.matches(entry, self.exceptions))
            .cloned()
            .collect())
    }

    async fn reconcile(&mut self) -> Result<Vec<Entry>> {
        let nodirs = self.exceptions.contains(Exception::NoDirs);
        let mut parser = Parser::new(&mut self.cache);

        let entries = match self.kind {
            ArchiveKind::Zip if nodirs => reconcile::zip_scan(&mut parser).await?,
            ArchiveKind::Zip => {
                let scan = match &self.eocd {
                    Some(location) => reconcile::zip_directory(&mut parser, location, &mut self.warnings).await?,
                    None => None,
                };
                match scan {
                    Some(scan) => {
                        if scan.split {
                            self.exceptions.insert(Exception::Split);
                        }
                        scan.entries
                    }
                    None => {
                        self.warnings.push("Directory unreadable");
                        if self.options.scan_fallback {
                            debug!(archive = %self.name, "falling back to local header scan");
                            reconcile::zip_scan(&mut parser).await?
                        } else {
                            Vec::new()
                        }
                    }
                }
            }
            ArchiveKind::Arc => reconcile::arc_chain(&mut parser, 0, nodirs, &mut self.warnings).await?,
        };

        if entries.is_empty() {
            self.exceptions.insert(Exception::NoFiles);
        }
        if entries.iter().any(|e| e.comment().is_some()) {
            self.exceptions.insert(Exception::Comment);
        }
        if entries.iter().any(Entry::is_encrypted) {
            self.exceptions.insert(Exception::Encrypted);
        }

        debug!(
            archive = %self.name,
            entries = entries.len(),
            warnings = self.warnings.len(),
            "directory reconciled"
        );
        Ok(entries)
    }

    /// Decode one entry, streaming decoded chunks into `sink` if given, and
    /// return the full decoded data. Problems with the data are added to the
    /// entry's warnings.
    pub async fn read_file(&mut self, entry: &mut Entry, sink: Option<&mut dyn Sink>) -> Result<Vec<u8>> {
        let mut extraction = Extraction {
            cache: &mut self.cache,
            kind: self.kind,
            password: self.options.password.as_deref(),
            inflater: self.options.inflater.clone(),
        };
        extraction.read_file(entry, sink).await
    }

    /// Reopen an entry's decoded bytes as an archive. Returns `None` when the
    /// entry name does not carry a `.ZIP` or `.ARC` extension.
    pub async fn open_nested(&self, entry: &Entry, bytes: Vec<u8>) -> Result<Option<Archive>> {
        let Some(kind) = ArchiveKind::from_extension(entry.name()) else {
            return Ok(None);
        };
        let options = OpenOptions {
            kind_hint: Some(kind),
            ..self.options.clone()
        };
        debug!(parent = %self.name, entry = entry.name(), "opening nested archive");
        let mut nested = Archive::open(ByteSource::from(bytes), options).await?;
        nested.name = format!("{}/{}", self.name, entry.name());
        Ok(Some(nested))
    }

    /// Release the byte source.
    pub fn close(self) {
        debug!(archive = %self.name, stats = ?self.cache.stats(), "archive closed");
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("exceptions", &self.exceptions)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}
