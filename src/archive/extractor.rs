//! Entry extraction.
//!
//! An entry's compressed bytes are pulled through the cache in bounded
//! chunks, decrypted, decoded, and handed to an optional [`Sink`] as they
//! are produced; the full decoded buffer is returned as well. Decoding
//! problems, size disagreements and CRC mismatches become entry warnings.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use tracing::debug;

use super::crypto::{ArcGarble, Decryptor, ENCRYPTION_HEADER_SIZE};
use super::model::{ArchiveKind, Entry, FLAG_DATA_DESCRIPTOR};
use super::reconcile::not_locatable;
use crate::checksum::EntryChecksum;
use crate::codec::{Codec, Decoder};
use crate::error::{Error, Result};
use crate::inflate::Inflate;
use crate::io::ByteCache;

/// Largest compressed chunk read at once, and largest write a [`Sink`] sees.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Output reserved up front; declared sizes beyond this grow as data arrives.
const INITIAL_CAPACITY: usize = 1024 * 1024;

/// Largest shortfall filled with zeros.
const PADDING_LIMIT: usize = 16 * 1024 * 1024;

/// Receives decoded data as it is produced.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, chunk: &[u8]) -> AnyResult<()>;

    /// Called once after the last chunk.
    async fn finish(&mut self) -> AnyResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Sink for Vec<u8> {
    async fn write(&mut self, chunk: &[u8]) -> AnyResult<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Everything extraction needs besides the entry itself.
pub struct Extraction<'a> {
    pub cache: &'a mut ByteCache,
    pub kind: ArchiveKind,
    pub password: Option<&'a [u8]>,
    pub inflater: Arc<dyn Inflate>,
}

/// Accumulates decoded output, capped at the entry's declared size.
struct Output<'s> {
    data: Vec<u8>,
    size: usize,
    checksum: EntryChecksum,
    sink: Option<&'s mut dyn Sink>,
    overrun: bool,
}

impl Output<'_> {
    async fn deliver(&mut self, decoded: &[u8]) -> Result<()> {
        let room = self.size - self.data.len();
        if decoded.len() > room {
            self.overrun = true;
        }
        let decoded = &decoded[..decoded.len().min(room)];
        if decoded.is_empty() {
            return Ok(());
        }
        self.checksum.update(decoded);
        if let Some(sink) = self.sink.as_mut() {
            for piece in decoded.chunks(CHUNK_SIZE) {
                sink.write(piece).await.map_err(Error::Sink)?;
            }
        }
        self.data.extend_from_slice(decoded);
        Ok(())
    }

    async fn pad(&mut self, mut missing: usize) -> Result<()> {
        let zeros = vec![0u8; missing.min(CHUNK_SIZE)];
        while missing > 0 {
            let length = missing.min(zeros.len());
            self.deliver(&zeros[..length]).await?;
            missing -= length;
        }
        Ok(())
    }
}

/// Capacity to reserve for an entry, bounded by what its compressed bytes
/// could plausibly expand to.
fn initial_capacity(size: usize, compressed: u64) -> usize {
    let plausible = usize::try_from(compressed)
        .unwrap_or(usize::MAX)
        .saturating_mul(8);
    size.min(plausible).min(INITIAL_CAPACITY)
}

impl Extraction<'_> {
    /// Decode one entry. See the module docs for what becomes a warning.
    pub async fn read_file(&mut self, entry: &mut Entry, sink: Option<&mut dyn Sink>) -> Result<Vec<u8>> {
        let Some(data_offset) = entry.data_offset() else {
            return Err(not_locatable(entry));
        };

        let method = entry.method();
        let Some(codec) = Codec::for_method(method, entry.flags()) else {
            entry.warn(format!("Unsupported method: {method}"));
            return Ok(Vec::new());
        };

        let mut decryptor = match self.kind {
            ArchiveKind::Zip if entry.is_encrypted() => match self.password {
                Some(password) => {
                    // The CRC is not known up front when sizes follow the data
                    let check = if entry.flags() & FLAG_DATA_DESCRIPTOR != 0 {
                        (entry.dos_time() >> 8) as u8
                    } else {
                        (entry.crc() >> 24) as u8
                    };
                    Some(Decryptor::zip(password, check))
                }
                None => {
                    entry.warn("Password required");
                    return Err(Error::NeedsPassword(entry.name().to_string()));
                }
            },
            ArchiveKind::Arc => self
                .password
                .and_then(ArcGarble::new)
                .map(Decryptor::Arc),
            ArchiveKind::Zip => None,
        };

        let size = usize::try_from(entry.size())
            .map_err(|_| Error::Malformed(format!("{}: size too large", entry.name())))?;
        let mut compressed = entry.compressed_size();
        if codec == Codec::Store {
            let expected = if matches!(decryptor, Some(Decryptor::Zip { .. })) {
                entry.size() + ENCRYPTION_HEADER_SIZE as u64
            } else {
                entry.size()
            };
            if compressed != expected {
                entry.warn(format!("Stored size {compressed} differs from length {}", entry.size()));
            }
        }
        let available = self.cache.size().saturating_sub(data_offset);
        if compressed > available {
            entry.warn(format!("Data truncated at {}", self.cache.size()));
            compressed = available;
        }

        let mut output = Output {
            data: Vec::with_capacity(initial_capacity(size, compressed)),
            size,
            checksum: EntryChecksum::for_kind(self.kind),
            sink,
            overrun: false,
        };
        let mut decoder = Decoder::new(codec, self.inflater.clone(), size);
        let mut decoded = Vec::new();
        let mut failure = None;
        let mut offset = data_offset;
        let end = data_offset + compressed;

        while offset < end && failure.is_none() {
            let length = (end - offset).min(CHUNK_SIZE as u64) as usize;
            let mut chunk = self.cache.read(offset, length).await?.to_vec();
            offset += length as u64;
            let plain: &[u8] = match decryptor.as_mut() {
                Some(decryptor) => decryptor.apply(&mut chunk),
                None => &chunk,
            };
            if let Err(err) = decoder.push(plain, &mut decoded).await {
                failure = Some(err);
            }
            output.deliver(&decoded).await?;
            decoded.clear();
        }
        if failure.is_none() {
            if let Err(err) = decoder.finish(&mut decoded).await {
                failure = Some(err);
            }
            output.deliver(&decoded).await?;
        }

        if let Some(err) = failure {
            entry.warn(format!("Decode error: {err}"));
        }
        if output.overrun {
            entry.warn(format!("Decoded data exceeds length {size}"));
        }
        if output.data.len() < size {
            let missing = size - output.data.len();
            entry.warn(format!("Decoded {} of {size} bytes", output.data.len()));
            if missing > PADDING_LIMIT || output.data.try_reserve_exact(missing).is_err() {
                entry.warn(format!("Not padded to length {size}"));
            } else {
                output.pad(missing).await?;
            }
        }
        if decryptor.as_ref().and_then(Decryptor::password_verified) == Some(false) {
            entry.warn("Incorrect password");
        }

        let Output {
            data,
            checksum,
            sink,
            ..
        } = output;
        let crc = checksum.finalize();
        if crc != entry.crc() {
            let width = match self.kind {
                ArchiveKind::Arc => 4,
                ArchiveKind::Zip => 8,
            };
            entry.warn(format!(
                "CRC mismatch: expected {:0width$x}, got {:0width$x}",
                entry.crc(),
                crc
            ));
        }
        if let Some(sink) = sink {
            sink.finish().await.map_err(Error::Sink)?;
        }

        debug!(name = entry.name(), size, warnings = entry.warnings().len(), "entry extracted");
        Ok(data)
    }
}
