//! The LZW family used by ARC.
//!
//! Methods 8 (Crunch) and 9 (Squash) are the dynamic LZW of Unix
//! `compress`: codes start at 9 bits and grow to 12 or 13 bits, code 256
//! clears the table. Methods 5-7 are the older fixed 12-bit scheme, where
//! the string table is a 4096-slot hash table and new strings land in the
//! slot their (prefix, suffix) pair hashes to.

use super::DecodeError;
use super::arc::Rle90;

const CLEAR: u32 = 256;
const FIRST: u32 = 257;
const INIT_BITS: u32 = 9;
const CRUNCH_BITS: u32 = 12;
const SQUASH_BITS: u32 = 13;

/// Reads `compress`-style codes.
///
/// Codes are taken from groups of `n_bits` bytes. Whenever the code size
/// changes or the table is cleared, the rest of the current group is
/// skipped.
struct CodeReader<'a> {
    data: &'a [u8],
    pos: usize,
    group: [u8; 16],
    /// Bit offset into the current group.
    offset: usize,
    /// Usable bits in the current group.
    available: usize,
    n_bits: u32,
    max_bits: u32,
    max_code: u32,
    cleared: bool,
}

impl<'a> CodeReader<'a> {
    fn new(data: &'a [u8], max_bits: u32) -> Self {
        Self {
            data,
            pos: 0,
            group: [0; 16],
            offset: 0,
            available: 0,
            n_bits: INIT_BITS,
            max_bits,
            max_code: (1 << INIT_BITS) - 1,
            cleared: false,
        }
    }

    /// Reset code size after a CLEAR.
    fn clear(&mut self) {
        self.cleared = true;
    }

    /// Next code, or `None` at end of input.
    fn next(&mut self, free_ent: u32) -> Option<u32> {
        if self.cleared || self.offset >= self.available || free_ent > self.max_code {
            if free_ent > self.max_code {
                self.n_bits += 1;
                self.max_code = if self.n_bits == self.max_bits {
                    1 << self.max_bits
                } else {
                    (1 << self.n_bits) - 1
                };
            }
            if self.cleared {
                self.n_bits = INIT_BITS;
                self.max_code = (1 << INIT_BITS) - 1;
                self.cleared = false;
            }
            let take = (self.n_bits as usize).min(self.data.len() - self.pos);
            if take == 0 {
                return None;
            }
            self.group[..take].copy_from_slice(&self.data[self.pos..self.pos + take]);
            self.pos += take;
            self.offset = 0;
            self.available = (take * 8).saturating_sub(self.n_bits as usize - 1);
            if self.available == 0 {
                return None;
            }
        }

        let mut code = 0u32;
        for i in 0..self.n_bits as usize {
            let bit = self.offset + i;
            if self.group[bit / 8] & (1 << (bit % 8)) != 0 {
                code |= 1 << i;
            }
        }
        self.offset += self.n_bits as usize;
        Some(code)
    }
}

/// Where decoded strings go: straight to the output or through RLE90.
struct Output<'a> {
    out: &'a mut Vec<u8>,
    rle: Option<Rle90>,
    limit: usize,
}

impl Output<'_> {
    fn write(&mut self, bytes: impl Iterator<Item = u8>) {
        for byte in bytes {
            match &mut self.rle {
                Some(rle) => rle.push(byte, self.out, self.limit),
                None if self.out.len() < self.limit => self.out.push(byte),
                None => {}
            }
        }
    }

    fn full(&self) -> bool {
        self.out.len() >= self.limit
    }
}

/// Crunch (ARC 8, with RLE90 and a leading max-bits byte) or Squash
/// (ARC 9, 13-bit codes, no RLE).
pub fn uncrunch(input: &[u8], size: usize, squash: bool, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    let (max_bits, data) = if squash {
        (SQUASH_BITS, input)
    } else {
        match input.split_first() {
            Some((&bits, rest)) if bits as u32 == CRUNCH_BITS => (CRUNCH_BITS, rest),
            Some(_) => return Err(DecodeError::InvalidTable("crunch code size is not 12")),
            None => return Err(DecodeError::UnexpectedEof),
        }
    };
    let max_max_code = 1u32 << max_bits;
    let mut output = Output {
        out,
        rle: (!squash).then(Rle90::new),
        limit: size,
    };

    let mut prefix = vec![0u32; max_max_code as usize];
    let mut suffix: Vec<u8> = (0..max_max_code).map(|c| c as u8).collect();
    let mut reader = CodeReader::new(data, max_bits);
    let mut free_ent = FIRST;

    let Some(first) = reader.next(free_ent) else {
        return if size == 0 {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedEof)
        };
    };
    if first >= CLEAR {
        return Err(DecodeError::InvalidCode(first));
    }
    let mut old_code = first;
    let mut fin_char = first as u8;
    output.write(std::iter::once(fin_char));

    let mut stack = Vec::new();
    while !output.full() {
        let Some(mut code) = reader.next(free_ent) else {
            return Err(DecodeError::UnexpectedEof);
        };
        if code == CLEAR {
            reader.clear();
            free_ent = FIRST - 1;
            match reader.next(free_ent) {
                Some(next) => code = next,
                None => return Err(DecodeError::UnexpectedEof),
            }
        }
        let in_code = code;

        if code > free_ent {
            return Err(DecodeError::InvalidCode(code));
        }
        if code == free_ent {
            stack.push(fin_char);
            code = old_code;
        }
        while code >= CLEAR {
            stack.push(suffix[code as usize]);
            code = prefix[code as usize];
            if stack.len() > max_max_code as usize {
                return Err(DecodeError::InvalidCode(in_code));
            }
        }
        fin_char = suffix[code as usize];
        stack.push(fin_char);
        output.write(stack.drain(..).rev());

        if free_ent < max_max_code {
            prefix[free_ent as usize] = old_code;
            suffix[free_ent as usize] = fin_char;
            free_ent += 1;
        }
        old_code = in_code;
    }
    Ok(())
}

const TABLE_SIZE: usize = 4096;
const NO_PRED: u16 = 0xFFFF;
const PROBE_STEP: usize = 101;

#[derive(Clone, Copy, Default)]
struct Slot {
    used: bool,
    next: u16,
    predecessor: u16,
    follower: u8,
}

/// String table of the fixed 12-bit methods.
struct HashTable {
    slots: Vec<Slot>,
    new_hash: bool,
}

impl HashTable {
    fn new(new_hash: bool) -> Self {
        let mut table = Self {
            slots: vec![Slot::default(); TABLE_SIZE],
            new_hash,
        };
        for c in 0..=255u8 {
            table.insert(NO_PRED, c);
        }
        table
    }

    fn hash(&self, pred: u16, foll: u8) -> usize {
        let key = pred.wrapping_add(foll as u16);
        if self.new_hash {
            (key as u32).wrapping_mul(15073) as usize & 0xFFF
        } else {
            let t = (key | 0x0800) as u32;
            (t.wrapping_mul(t) >> 6) as usize & 0xFFF
        }
    }

    /// Place a string, returning the slot it landed in.
    fn insert(&mut self, pred: u16, foll: u8) -> usize {
        let mut slot = self.hash(pred, foll);
        if self.slots[slot].used {
            let mut end = slot;
            while self.slots[end].next != 0 {
                end = self.slots[end].next as usize;
            }
            slot = (end + PROBE_STEP) & 0xFFF;
            while self.slots[slot].used {
                slot = (slot + 1) % TABLE_SIZE;
            }
            self.slots[end].next = slot as u16;
        }
        self.slots[slot] = Slot {
            used: true,
            next: 0,
            predecessor: pred,
            follower: foll,
        };
        slot
    }
}

/// Fixed 12-bit codes, two codes packed into three bytes, high bits first.
struct PairReader<'a> {
    data: &'a [u8],
    pos: usize,
    pending: Option<u8>,
}

impl PairReader<'_> {
    fn next(&mut self) -> Option<u16> {
        match self.pending.take() {
            Some(high) => {
                let low = *self.data.get(self.pos)?;
                self.pos += 1;
                Some(((high as u16) << 8) | low as u16)
            }
            None => {
                let b0 = *self.data.get(self.pos)?;
                let b1 = *self.data.get(self.pos + 1)?;
                self.pos += 2;
                self.pending = Some(b1 & 0x0F);
                Some(((b0 as u16) << 4) | (b1 >> 4) as u16)
            }
        }
    }
}

/// Old-style crunching (ARC 5, 6 and 7).
pub fn uncrunch_fixed(
    input: &[u8],
    size: usize,
    rle: bool,
    new_hash: bool,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let mut output = Output {
        out,
        rle: rle.then(Rle90::new),
        limit: size,
    };
    let mut table = HashTable::new(new_hash);
    let mut codes = PairReader {
        data: input,
        pos: 0,
        pending: None,
    };

    let Some(first) = codes.next() else {
        return if size == 0 {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedEof)
        };
    };
    let first_slot = table.slots[first as usize];
    if !first_slot.used || first_slot.predecessor != NO_PRED {
        return Err(DecodeError::InvalidCode(first as u32));
    }
    let mut old_code = first;
    let mut fin_char = first_slot.follower;
    output.write(std::iter::once(fin_char));

    let mut remaining = TABLE_SIZE - 256;
    let mut stack = Vec::new();
    while !output.full() {
        let Some(new_code) = codes.next() else {
            return Err(DecodeError::UnexpectedEof);
        };
        let mut code = new_code;
        if !table.slots[code as usize].used {
            stack.push(fin_char);
            code = old_code;
        }
        while table.slots[code as usize].predecessor != NO_PRED {
            stack.push(table.slots[code as usize].follower);
            code = table.slots[code as usize].predecessor;
            if stack.len() > TABLE_SIZE {
                return Err(DecodeError::InvalidCode(new_code as u32));
            }
        }
        fin_char = table.slots[code as usize].follower;
        stack.push(fin_char);
        output.write(stack.drain(..).rev());

        if remaining > 0 {
            table.insert(old_code, fin_char);
            remaining -= 1;
        }
        old_code = new_code;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bits::BitWriter;

    fn dynamic_codes(codes: &[u32]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        for &code in codes {
            writer.write_bits(code, 9);
        }
        writer.finish()
    }

    fn fixed_codes(codes: &[usize]) -> Vec<u8> {
        let mut data = Vec::new();
        for pair in codes.chunks(2) {
            let c1 = pair[0] as u16;
            data.push((c1 >> 4) as u8);
            match pair.get(1) {
                Some(&c2) => {
                    let c2 = c2 as u16;
                    data.push((((c1 & 0x0F) << 4) | (c2 >> 8)) as u8);
                    data.push(c2 as u8);
                }
                None => data.push(((c1 & 0x0F) << 4) as u8),
            }
        }
        data
    }

    #[test]
    fn test_squash_kwkwk() {
        let data = dynamic_codes(&[65, 66, 257, 259]);
        let mut out = Vec::new();
        uncrunch(&data, 7, true, &mut out).unwrap();
        assert_eq!(out, b"ABABABA");
    }

    #[test]
    fn test_crunch_header_and_rle() {
        let mut data = vec![12];
        data.extend(dynamic_codes(&[b'x' as u32, 0x90, 5]));
        let mut out = Vec::new();
        uncrunch(&data, 5, false, &mut out).unwrap();
        assert_eq!(out, b"xxxxx");
    }

    #[test]
    fn test_crunch_rejects_bad_header() {
        let mut out = Vec::new();
        assert!(matches!(
            uncrunch(&[13, 0, 0], 3, false, &mut out),
            Err(DecodeError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_clear_skips_rest_of_group() {
        let mut writer = BitWriter::new();
        writer.write_bits(65, 9);
        writer.write_bits(CLEAR, 9);
        // the rest of the nine-byte group is padding
        writer.write_bits(0, 27);
        writer.write_bits(0, 27);
        writer.write_bits(66, 9);
        writer.write_bits(67, 9);
        let data = writer.finish();
        let mut out = Vec::new();
        uncrunch(&data, 3, true, &mut out).unwrap();
        assert_eq!(out, b"ABC");
    }

    #[test]
    fn test_code_beyond_table_is_invalid() {
        let data = dynamic_codes(&[65, 300]);
        let mut out = Vec::new();
        assert_eq!(
            uncrunch(&data, 5, true, &mut out),
            Err(DecodeError::InvalidCode(300))
        );
        assert_eq!(out, b"A");
    }

    #[test]
    fn test_hash_collisions_chain_to_free_slots() {
        let mut table = HashTable::new(false);
        let used = table.slots.iter().filter(|s| s.used).count();
        assert_eq!(used, 256);
        let a = table.slots.iter().position(|s| s.used && s.follower == b'A').unwrap();
        let first = table.insert(a as u16, b'B');
        let second = table.insert(a as u16, b'B');
        assert_ne!(first, second);
        assert_eq!(table.slots[first].next as usize, second);
    }

    fn literal_slot(table: &HashTable, c: u8) -> usize {
        table
            .slots
            .iter()
            .position(|s| s.used && s.predecessor == NO_PRED && s.follower == c)
            .unwrap()
    }

    #[test]
    fn test_old_crunch_strings() {
        for new_hash in [false, true] {
            let mut table = HashTable::new(new_hash);
            let a = literal_slot(&table, b'A');
            let b = literal_slot(&table, b'B');
            let ab = table.insert(a as u16, b'B');
            let data = fixed_codes(&[a, b, ab]);
            let mut out = Vec::new();
            uncrunch_fixed(&data, 4, false, new_hash, &mut out).unwrap();
            assert_eq!(out, b"ABAB");
        }
    }

    #[test]
    fn test_old_crunch_unknown_code() {
        let mut table = HashTable::new(true);
        let a = literal_slot(&table, b'A');
        let aa = table.insert(a as u16, b'A');
        let data = fixed_codes(&[a, aa]);
        let mut out = Vec::new();
        uncrunch_fixed(&data, 3, true, true, &mut out).unwrap();
        assert_eq!(out, b"AAA");
    }

    #[test]
    fn test_old_crunch_truncated() {
        let table = HashTable::new(false);
        let a = literal_slot(&table, b'A');
        let data = fixed_codes(&[a]);
        let mut out = Vec::new();
        assert_eq!(
            uncrunch_fixed(&data, 2, false, false, &mut out),
            Err(DecodeError::UnexpectedEof)
        );
        assert_eq!(out, b"A");
    }

    #[test]
    fn test_reference_streams() {
        let expected = include_bytes!("../../__fixtures__/legacy/lorem.txt.expected");

        let data = include_bytes!("../../__fixtures__/legacy/lorem.crunched");
        let mut out = Vec::new();
        uncrunch(data, expected.len(), false, &mut out).unwrap();
        assert_eq!(out, expected.as_slice());

        let data = include_bytes!("../../__fixtures__/legacy/lorem.squashed");
        let mut out = Vec::new();
        uncrunch(data, expected.len(), true, &mut out).unwrap();
        assert_eq!(out, expected.as_slice());
    }
}
