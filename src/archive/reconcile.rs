//! Building the authoritative entry list.
//!
//! In directory-trusted mode each central directory record is paired with
//! the local header found at its recorded offset (ARC archives have no
//! directory, so their header chain is walked instead). In scan mode the
//! directory is ignored and the byte stream is searched for local headers
//! from the start, which recovers what is actually decodable when the
//! directory is truncated, reordered or wrong.

use tracing::debug;

use super::model::{Entry, FLAG_DATA_DESCRIPTOR, Header, WarningLog};
use super::parser::{EocdLocation, Parser};
use super::structures::{ARC_MARKER, ArcRecord, CDFH_SIGNATURE, DD_SIGNATURE, DataDescriptor, LFH_SIGNATURE};
use crate::error::{Error, Result};

/// Warning for a directory record whose offset holds no local header.
pub fn missing_header(offset: u64) -> String {
    format!("Position {offset} missing FileHeader")
}

/// Pass structural problems back as `Ok(None)` and anything else (a failing
/// byte source) as an error.
fn structural<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_structural() => Ok(None),
        Err(err) => Err(err),
    }
}

/// What a directory read produced.
pub struct DirectoryScan {
    pub entries: Vec<Entry>,
    pub split: bool,
}

/// Directory-trusted ZIP reconciliation. Returns `None` when the central
/// directory cannot be read at all.
pub async fn zip_directory(
    parser: &mut Parser<'_>,
    location: &EocdLocation,
    warnings: &mut WarningLog,
) -> Result<Option<DirectoryScan>> {
    let Some(extent) = structural(parser.directory_extent(location).await)? else {
        return Ok(None);
    };

    // Archives with a prefix (self-extractors, or a file glued onto the
    // front) state offsets relative to the original start. When the
    // directory is not where it claims to be but does end at the EOCD,
    // every stated offset is off by the same amount.
    let mut start = extent.offset;
    let mut shift: i64 = 0;
    if !parser.has_signature(start, CDFH_SIGNATURE).await? && extent.entries > 0 {
        if let Some(actual) = location.offset.checked_sub(extent.size) {
            if actual != start && parser.has_signature(actual, CDFH_SIGNATURE).await? {
                shift = actual as i64 - start as i64;
                start = actual;
                warnings.push(format!("Directory offset adjusted by {shift}"));
            }
        }
    }

    let end = start.saturating_add(extent.size);
    let mut directory = Vec::new();
    let mut offset = start;
    while (directory.len() as u64) < extent.entries && offset < end {
        match structural(parser.read_cdfh(offset).await)? {
            Some((header, len)) => {
                directory.push(header);
                offset += len;
            }
            None => {
                warnings.push(format!("Position {offset} missing DirHeader"));
                break;
            }
        }
    }
    if directory.len() as u64 != extent.entries {
        warnings.push(format!(
            "Directory lists {} entries, found {}",
            extent.entries,
            directory.len()
        ));
    }
    if directory.is_empty() && extent.entries > 0 {
        return Ok(None);
    }

    let mut entries = Vec::with_capacity(directory.len());
    for mut header in directory {
        header.offset = header.offset.saturating_add_signed(shift);
        match structural(parser.read_lfh(header.offset).await)? {
            Some(local) => entries.push(Entry::from_pair(header, local)),
            None => {
                let mut entry = Entry::from_directory(header);
                let offset = entry.directory().map_or(0, |h| h.offset);
                entry.warn(missing_header(offset));
                entries.push(entry);
            }
        }
    }

    debug!(
        records = entries.len(),
        declared = extent.entries,
        split = extent.split,
        "central directory read"
    );
    Ok(Some(DirectoryScan {
        entries,
        split: extent.split,
    }))
}

/// Scan for local headers from the start of the source, in increasing
/// offset order.
pub async fn zip_scan(parser: &mut Parser<'_>) -> Result<Vec<Entry>> {
    let size = parser.size();
    let mut entries = Vec::new();
    let mut offset = 0;

    while let Some(position) = parser.find_signature(offset, LFH_SIGNATURE).await? {
        let Some(mut header) = structural(parser.read_lfh(position).await)? else {
            offset = position + 1;
            continue;
        };
        let data_offset = header.data_offset.unwrap_or(position);
        let mut problems = Vec::new();

        let next = if header.flags & FLAG_DATA_DESCRIPTOR != 0 && header.compressed_size == 0 {
            match find_descriptor(parser, data_offset).await? {
                Some((descriptor, at)) => {
                    header.crc = descriptor.crc;
                    header.compressed_size = descriptor.compressed_size;
                    header.size = descriptor.size;
                    at + DataDescriptor::SIZE as u64
                }
                None => {
                    problems.push("Missing data descriptor".to_string());
                    data_offset
                }
            }
        } else {
            data_offset.saturating_add(header.compressed_size)
        };
        if next > size {
            problems.push(format!("Data truncated at {size}"));
        }

        let mut entry = Entry::from_local(header);
        for problem in problems {
            entry.warn(problem);
        }
        entries.push(entry);
        offset = next.max(position + 1);
    }

    debug!(entries = entries.len(), "local header scan finished");
    Ok(entries)
}

/// Find the data descriptor that closes an entry starting at `data_offset`:
/// the first signature whose recorded compressed size matches its distance
/// from the data start.
async fn find_descriptor(
    parser: &mut Parser<'_>,
    data_offset: u64,
) -> Result<Option<(DataDescriptor, u64)>> {
    let mut from = data_offset;
    while let Some(at) = parser.find_signature(from, DD_SIGNATURE).await? {
        if let Some(descriptor) = structural(parser.read_data_descriptor(at).await)? {
            if descriptor.compressed_size == at - data_offset {
                return Ok(Some((descriptor, at)));
            }
        }
        from = at + 1;
    }
    Ok(None)
}

/// Walk an ARC header chain starting at `start`. With `resync`, a broken
/// link is skipped by searching for the next plausible header; otherwise
/// the walk stops there.
pub async fn arc_chain(
    parser: &mut Parser<'_>,
    start: u64,
    resync: bool,
    warnings: &mut WarningLog,
) -> Result<Vec<Entry>> {
    let size = parser.size();
    let mut entries = Vec::new();
    let mut offset = start;

    loop {
        let record = match parser.read_arc(offset).await {
            Ok(record) => record,
            Err(err) if err.is_structural() => {
                warnings.push(missing_header(offset));
                if !resync {
                    break;
                }
                match next_arc_header(parser, offset + 1).await? {
                    Some(found) => {
                        offset = found;
                        continue;
                    }
                    None => break,
                }
            }
            Err(err) => return Err(err),
        };

        match record {
            ArcRecord::End => break,
            ArcRecord::Info { kind, next } => {
                debug!(kind, offset, "skipping ARC information record");
                offset = next;
            }
            ArcRecord::Entry(header) => {
                let data_offset = header.data_offset.unwrap_or(offset);
                let next = data_offset.saturating_add(header.compressed_size);
                let mut entry = Entry::from_local(header);
                if next > size {
                    entry.warn(format!("Data truncated at {size}"));
                }
                entries.push(entry);
                offset = next;
            }
        }
    }

    debug!(entries = entries.len(), "ARC header chain read");
    Ok(entries)
}

/// Find the next offset that parses as a believable ARC member header.
async fn next_arc_header(parser: &mut Parser<'_>, from: u64) -> Result<Option<u64>> {
    let size = parser.size();
    let mut from = from;
    while let Some(at) = parser.find_signature(from, &[ARC_MARKER]).await? {
        if let Ok(ArcRecord::Entry(header)) = parser.read_arc(at).await {
            if plausible_arc_header(&header, size) {
                return Ok(Some(at));
            }
        }
        from = at + 1;
    }
    Ok(None)
}

fn plausible_arc_header(header: &Header, size: u64) -> bool {
    !header.name.is_empty()
        && header.name.chars().all(|c| c.is_ascii_graphic())
        && header
            .data_offset
            .is_some_and(|d| d.saturating_add(header.compressed_size) <= size)
}

/// A missing local header for a directory-only entry.
pub fn not_locatable(entry: &Entry) -> Error {
    Error::NotLocatable(entry.name().to_string())
}
