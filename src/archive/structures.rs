//! Binary record layouts for ZIP and ARC containers.
//!
//! Everything here is pure byte decoding; reading the bytes is the job of
//! [`parser`](super::parser).

use std::io::Cursor;
use std::sync::LazyLock;

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};

use super::model::{FLAG_UTF8, Header, Method};
use crate::error::{Error, Result};

fn malformed(what: impl Into<String>) -> Error {
    Error::Malformed(what.into())
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    /// Part of a multi-volume set.
    pub fn is_split(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0 || self.disk_entries != self.total_entries
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid ZIP64 locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(malformed("invalid ZIP64 end of central directory"));
        }

        // record size, version made by, version needed
        let mut cursor = Cursor::new(&data[16..]);

        Ok(Self {
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor, optionally preceded by this signature.
pub const DD_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Markers a spanned archive's first volume may start with.
pub const SPAN_SIGNATURES: [&[u8]; 2] = [b"PK\x07\x08", b"PK00"];

/// Total length of a central directory record given its fixed part.
pub fn cdfh_len(fixed: &[u8]) -> usize {
    let name = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
    let extra = u16::from_le_bytes([fixed[30], fixed[31]]) as usize;
    let comment = u16::from_le_bytes([fixed[32], fixed[33]]) as usize;
    CDFH_MIN_SIZE + name + extra + comment
}

/// Total length of a local header given its fixed part.
pub fn lfh_len(fixed: &[u8]) -> usize {
    let name = u16::from_le_bytes([fixed[26], fixed[27]]) as usize;
    let extra = u16::from_le_bytes([fixed[28], fixed[29]]) as usize;
    LFH_SIZE + name + extra
}

/// Sizes and offset that a ZIP64 extra field may widen.
struct Widened {
    size: u64,
    compressed_size: u64,
    offset: u64,
}

/// Apply a ZIP64 extended information field (0x0001), if present.
fn apply_zip64_extra(extra: &[u8], mut values: Widened) -> Result<Widened> {
    let mut cursor = Cursor::new(extra);
    let end = extra.len() as u64;

    while cursor.position() + 4 <= end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = (cursor.position() + field_size).min(end);

        if header_id == 0x0001 {
            // Fields are present only if the 32-bit field is saturated
            if values.size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                values.size = cursor.read_u64::<LittleEndian>()?;
            }
            if values.compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                values.compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if values.offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                values.offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    Ok(values)
}

/// Parse a complete central directory record.
pub fn parse_cdfh(record: &[u8]) -> Result<Header> {
    if record.len() < CDFH_MIN_SIZE || &record[0..4] != CDFH_SIGNATURE {
        return Err(malformed("invalid central directory record"));
    }
    if record.len() < cdfh_len(record) {
        return Err(malformed("central directory record truncated"));
    }

    let mut cursor = Cursor::new(&record[4..]);
    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
    let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let offset = cursor.read_u32::<LittleEndian>()? as u64;

    let name_end = CDFH_MIN_SIZE + name_len;
    let extra_end = name_end + extra_len;
    let utf8 = flags & FLAG_UTF8 != 0;

    let widened = apply_zip64_extra(
        &record[name_end..extra_end],
        Widened {
            size,
            compressed_size,
            offset,
        },
    )?;
    let comment = &record[extra_end..extra_end + comment_len];

    Ok(Header {
        name: decode_name(&record[CDFH_MIN_SIZE..name_end], utf8),
        // DOS attributes live in the low byte
        attr: external_attrs & 0xFF,
        method: Method::Zip(method),
        flags,
        size: widened.size,
        compressed_size: widened.compressed_size,
        modified: dos_datetime(date, time),
        dos_time: time,
        crc,
        comment: (!comment.is_empty()).then(|| decode_text(comment, utf8)),
        offset: widened.offset,
        data_offset: None,
    })
}

/// Parse a complete local header found at `offset`.
pub fn parse_lfh(record: &[u8], offset: u64) -> Result<Header> {
    if record.len() < LFH_SIZE || &record[0..4] != LFH_SIGNATURE {
        return Err(malformed("invalid local file header"));
    }
    let len = lfh_len(record);
    if record.len() < len {
        return Err(malformed("local file header truncated"));
    }

    let mut cursor = Cursor::new(&record[4..]);
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let time = cursor.read_u16::<LittleEndian>()?;
    let date = cursor.read_u16::<LittleEndian>()?;
    let crc = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;

    let name_end = LFH_SIZE + name_len;
    let widened = apply_zip64_extra(
        &record[name_end..len],
        Widened {
            size,
            compressed_size,
            offset,
        },
    )?;

    Ok(Header {
        name: decode_name(&record[LFH_SIZE..name_end], flags & FLAG_UTF8 != 0),
        attr: 0,
        method: Method::Zip(method),
        flags,
        size: widened.size,
        compressed_size: widened.compressed_size,
        modified: dos_datetime(date, time),
        dos_time: time,
        crc,
        comment: None,
        offset,
        data_offset: Some(offset + len as u64),
    })
}

/// Sizes and CRC written after an entry's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc: u32,
    pub compressed_size: u64,
    pub size: u64,
}

impl DataDescriptor {
    /// Length with the optional signature.
    pub const SIZE: usize = 16;

    /// Parse a descriptor that starts with [`DD_SIGNATURE`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != DD_SIGNATURE {
            return Err(malformed("invalid data descriptor"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            crc: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()? as u64,
            size: cursor.read_u32::<LittleEndian>()? as u64,
        })
    }
}

/// ARC header marker byte.
pub const ARC_MARKER: u8 = 0x1A;
/// Header length for method 1 (no original size field).
pub const ARC_OLD_HEADER_SIZE: usize = 25;
pub const ARC_HEADER_SIZE: usize = 29;
const ARC_NAME_LEN: usize = 13;
/// Method types at or above this are information records, not members.
pub const ARC_INFO_TYPE: u8 = 20;

/// One step of an ARC header chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArcRecord {
    /// Type 0: end of archive.
    End,
    Entry(Header),
    /// An information record whose payload should be skipped.
    Info { kind: u8, next: u64 },
}

impl ArcRecord {
    /// Header length implied by the method byte.
    pub fn header_len(kind: u8) -> usize {
        if kind == 1 {
            ARC_OLD_HEADER_SIZE
        } else {
            ARC_HEADER_SIZE
        }
    }

    /// Parse a record at `offset`; `data` must hold at least two bytes, and
    /// the full header for anything but an end marker.
    pub fn parse(data: &[u8], offset: u64) -> Result<Self> {
        if data.len() < 2 || data[0] != ARC_MARKER || data[1] >= 0x80 {
            return Err(malformed(format!("missing ARC header at {offset}")));
        }
        let kind = data[1];
        if kind == 0 {
            return Ok(ArcRecord::End);
        }
        let len = Self::header_len(kind);
        if data.len() < len {
            return Err(malformed("ARC header truncated"));
        }

        let raw_name = &data[2..2 + ARC_NAME_LEN];
        let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(ARC_NAME_LEN);
        let mut cursor = Cursor::new(&data[2 + ARC_NAME_LEN..len]);
        let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let date = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()?;
        let crc = cursor.read_u16::<LittleEndian>()? as u32;
        let size = if kind == 1 {
            compressed_size
        } else {
            cursor.read_u32::<LittleEndian>()? as u64
        };

        let data_offset = offset + len as u64;
        if kind >= ARC_INFO_TYPE {
            return Ok(ArcRecord::Info {
                kind,
                next: data_offset + compressed_size,
            });
        }

        Ok(ArcRecord::Entry(Header {
            name: decode_name(&raw_name[..name_len], false),
            attr: 0,
            method: Method::Arc(kind),
            flags: 0,
            size,
            compressed_size,
            modified: dos_datetime(date, time),
            dos_time: time,
            crc,
            comment: None,
            offset,
            data_offset: Some(data_offset),
        }))
    }
}

/// Convert a DOS packed date and time. Invalid fields yield `None`.
pub fn dos_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let day = (date & 0x1F) as u32;
    let month = ((date >> 5) & 0x0F) as u32;
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let second = ((time & 0x1F) * 2) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second.min(59))
}

/// Upper half of code page 437.
const CP437_HIGH: &str = "ÇüéâäàåçêëèïîìÄÅÉæÆôöòûùÿÖÜ¢£¥₧ƒáíóúñÑªº¿⌐¬½¼¡«»\
░▒▓│┤╡╢╖╕╣║╗╝╜╛┐└┴┬├─┼╞╟╚╔╩╦╠═╬╧╨╤╥╙╘╒╓╫╪┘┌█▄▌▐▀\
αßΓπΣσµτΦΘΩδ∞φε∩≡±≥≤⌠⌡÷≈°∙·√ⁿ²■\u{a0}";

static CP437: LazyLock<Vec<char>> = LazyLock::new(|| CP437_HIGH.chars().collect());

/// Decode text stored either as UTF-8 or as code page 437.
pub fn decode_text(bytes: &[u8], utf8: bool) -> String {
    if utf8 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP437.get((b - 0x80) as usize).copied().unwrap_or('?')
            }
        })
        .collect()
}

/// Decode an entry name, normalizing DOS path separators.
pub fn decode_name(bytes: &[u8], utf8: bool) -> String {
    decode_text(bytes, utf8).replace('\\', "/")
}
