//! Cache-driven record reads.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the central directory records
//! 4. For extraction, read each entry's local header to find its data
//!
//! ARC files are a simple chain of headers, each followed by its payload.
//! Every read goes through the archive's [`ByteCache`], so listing a remote
//! archive only fetches the windows that hold its structures.

use crate::error::{Error, Result};
use crate::io::ByteCache;

use super::model::Header;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Bytes examined per step when scanning for a signature.
const SCAN_STEP: usize = 32 * 1024;

/// A located end-of-central-directory record.
pub struct EocdLocation {
    pub eocd: EndOfCentralDirectory,
    pub offset: u64,
    pub comment: Vec<u8>,
}

/// Central directory position, widened through ZIP64 when needed.
pub struct DirectoryExtent {
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
    pub split: bool,
}

/// Reads records through an archive's cache.
pub struct Parser<'a> {
    cache: &'a mut ByteCache,
}

impl<'a> Parser<'a> {
    pub fn new(cache: &'a mut ByteCache) -> Self {
        Self { cache }
    }

    pub fn size(&self) -> u64 {
        self.cache.size()
    }

    /// Read up to `length` bytes, stopping at the end of the source.
    pub async fn read_clamped(&mut self, offset: u64, length: usize) -> Result<&[u8]> {
        let size = self.cache.size();
        if offset >= size {
            return Ok(&[]);
        }
        let available = (size - offset).min(length as u64) as usize;
        self.cache.read(offset, available).await
    }

    /// Find and parse the End of Central Directory record, or `None` when
    /// the tail holds no plausible EOCD.
    pub async fn find_eocd(&mut self) -> Result<Option<EocdLocation>> {
        let size = self.cache.size();
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if size < eocd_size {
            return Ok(None);
        }

        // Common case first: no comment
        let offset = size - eocd_size;
        let buf = self.cache.read(offset, EndOfCentralDirectory::SIZE).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            let eocd = EndOfCentralDirectory::from_bytes(buf)?;
            return Ok(Some(EocdLocation {
                eocd,
                offset,
                comment: Vec::new(),
            }));
        }

        // Otherwise search backwards; the comment may be followed by junk,
        // so any comment length that fits is accepted
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(size);
        let search_start = size - search_size;
        let buf = self.cache.read(search_start, search_size as usize).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            let comment_start = i + EndOfCentralDirectory::SIZE;
            if comment_start + comment_len <= buf.len() {
                let eocd = EndOfCentralDirectory::from_bytes(&buf[i..comment_start])?;
                return Ok(Some(EocdLocation {
                    eocd,
                    offset: search_start + i as u64,
                    comment: buf[comment_start..comment_start + comment_len].to_vec(),
                }));
            }
        }

        Ok(None)
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// The locator sits immediately before the regular EOCD.
    pub async fn read_zip64_eocd(&mut self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::Malformed("no room for ZIP64 locator".into()))?;
        let buf = self.cache.read(locator_offset, Zip64EOCDLocator::SIZE).await?;
        let locator = Zip64EOCDLocator::from_bytes(buf)?;

        let buf = self.cache.read(locator.eocd64_offset, Zip64EOCD::MIN_SIZE).await?;
        Zip64EOCD::from_bytes(buf)
    }

    /// Work out where the central directory is, using ZIP64 records when
    /// the EOCD fields are saturated.
    pub async fn directory_extent(&mut self, location: &EocdLocation) -> Result<DirectoryExtent> {
        let eocd = &location.eocd;
        if eocd.is_zip64() {
            if let Ok(eocd64) = self.read_zip64_eocd(location.offset).await {
                return Ok(DirectoryExtent {
                    offset: eocd64.cd_offset,
                    size: eocd64.cd_size,
                    entries: eocd64.total_entries,
                    split: eocd64.disk_number != 0
                        || eocd64.disk_with_cd != 0
                        || eocd64.disk_entries != eocd64.total_entries,
                });
            }
        }
        Ok(DirectoryExtent {
            offset: eocd.cd_offset as u64,
            size: eocd.cd_size as u64,
            entries: eocd.total_entries as u64,
            split: eocd.is_split(),
        })
    }

    /// Parse the central directory record at `offset`, returning it with
    /// its total length.
    pub async fn read_cdfh(&mut self, offset: u64) -> Result<(Header, u64)> {
        let fixed = self.cache.read(offset, CDFH_MIN_SIZE).await?;
        if &fixed[0..4] != CDFH_SIGNATURE {
            return Err(Error::Malformed(format!(
                "no central directory record at {offset}"
            )));
        }
        let len = cdfh_len(fixed);
        let record = self.cache.read(offset, len).await?;
        Ok((parse_cdfh(record)?, len as u64))
    }

    /// Parse the local header at `offset`.
    pub async fn read_lfh(&mut self, offset: u64) -> Result<Header> {
        let fixed = self.cache.read(offset, LFH_SIZE).await?;
        if &fixed[0..4] != LFH_SIGNATURE {
            return Err(Error::Malformed(format!("no local header at {offset}")));
        }
        let len = lfh_len(fixed);
        let record = self.cache.read(offset, len).await?;
        parse_lfh(record, offset)
    }

    /// Whether the bytes at `offset` start with `signature`.
    pub async fn has_signature(&mut self, offset: u64, signature: &[u8]) -> Result<bool> {
        let bytes = self.read_clamped(offset, signature.len()).await?;
        Ok(bytes == signature)
    }

    /// Find the first occurrence of `signature` at or after `from`, in
    /// increasing offset order.
    pub async fn find_signature(&mut self, from: u64, signature: &[u8]) -> Result<Option<u64>> {
        let size = self.cache.size();
        let mut offset = from;
        while offset + signature.len() as u64 <= size {
            let chunk = self.read_clamped(offset, SCAN_STEP + signature.len() - 1).await?;
            if let Some(i) = chunk.windows(signature.len()).position(|w| w == signature) {
                return Ok(Some(offset + i as u64));
            }
            offset += SCAN_STEP as u64;
        }
        Ok(None)
    }

    /// Parse the data descriptor at `offset`.
    pub async fn read_data_descriptor(&mut self, offset: u64) -> Result<DataDescriptor> {
        let bytes = self.cache.read(offset, DataDescriptor::SIZE).await?;
        DataDescriptor::from_bytes(bytes)
    }

    /// Parse the ARC record at `offset`. Running off the end of the source
    /// reads as an end marker.
    pub async fn read_arc(&mut self, offset: u64) -> Result<ArcRecord> {
        let head = self.read_clamped(offset, 2).await?;
        if head.is_empty() {
            return Ok(ArcRecord::End);
        }
        if head.len() < 2 || head[0] != ARC_MARKER || head[1] >= 0x80 {
            return Err(Error::Malformed(format!("missing ARC header at {offset}")));
        }
        let len = ArcRecord::header_len(head[1]);
        let record = self.read_clamped(offset, len).await?;
        ArcRecord::parse(record, offset)
    }
}
