//! Entry checksums.
//!
//! ZIP entries carry a CRC-32 (computed with `crc32fast`). ARC entries carry
//! the 16-bit CRC of the ARC utility (reflected polynomial 0xA001, initial
//! value 0), which has no crate in our stack, so it is table-driven here.

use crate::archive::ArchiveKind;

/// CRC-16/ARC lookup table (polynomial 0xA001)
const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Incremental CRC-16 as used by ARC.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.crc ^ byte as u16) & 0xFF) as usize;
            self.crc = (self.crc >> 8) ^ CRC16_TABLE[index];
        }
    }

    pub fn finalize(self) -> u16 {
        self.crc
    }
}

/// Checksum accumulator matching an archive's container kind.
pub enum EntryChecksum {
    Crc32(crc32fast::Hasher),
    Crc16(Crc16),
}

impl EntryChecksum {
    pub fn for_kind(kind: ArchiveKind) -> Self {
        match kind {
            ArchiveKind::Zip => EntryChecksum::Crc32(crc32fast::Hasher::new()),
            ArchiveKind::Arc => EntryChecksum::Crc16(Crc16::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            EntryChecksum::Crc32(hasher) => hasher.update(data),
            EntryChecksum::Crc16(crc) => crc.update(data),
        }
    }

    pub fn finalize(self) -> u32 {
        match self {
            EntryChecksum::Crc32(hasher) => hasher.finalize(),
            EntryChecksum::Crc16(crc) => crc.finalize() as u32,
        }
    }
}

/// CRC-16/ARC of a whole buffer.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b""), 0);
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_entry_checksum_matches_kind() {
        let mut zip = EntryChecksum::for_kind(ArchiveKind::Zip);
        zip.update(b"1234");
        zip.update(b"56789");
        assert_eq!(zip.finalize(), 0xCBF43926);

        let mut arc = EntryChecksum::for_kind(ArchiveKind::Arc);
        arc.update(b"123456789");
        assert_eq!(arc.finalize(), 0xBB3D);
    }
}
