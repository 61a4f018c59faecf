//! Implode (ZIP method 6).
//!
//! A sliding-window method with Shannon-Fano coded lengths and distances,
//! plus an optional Shannon-Fano coded literal alphabet. The trees are sent
//! at the start of the stream as run-length encoded bit lengths.

use std::collections::HashMap;

use super::bits::BitReader;
use super::{DecodeError, copy_match};

const LITERAL_SYMBOLS: usize = 256;
const LENGTH_SYMBOLS: usize = 64;
const DISTANCE_SYMBOLS: usize = 64;
const MAX_CODE_LEN: u32 = 16;
/// Length symbol that takes an extra literal byte.
const LONG_LENGTH: u16 = 63;

/// A Shannon-Fano code table, keyed by (bit length, code).
struct Tree {
    codes: HashMap<(u32, u32), u16>,
}

impl Tree {
    /// Read the compressed bit lengths of a tree with `count` symbols.
    ///
    /// The first byte holds the number of following bytes minus one; each
    /// following byte packs a repeat count (high nibble) and a bit length
    /// (low nibble), both stored minus one.
    fn read(bits: &mut BitReader, count: usize) -> Result<Self, DecodeError> {
        let bytes = bits.read_byte()? as usize + 1;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..bytes {
            let byte = bits.read_byte()?;
            let repeat = (byte >> 4) as usize + 1;
            let length = (byte & 0x0F) as u32 + 1;
            if lengths.len() + repeat > count {
                return Err(DecodeError::InvalidTable("too many code lengths"));
            }
            lengths.extend(std::iter::repeat_n(length, repeat));
        }
        if lengths.len() != count {
            return Err(DecodeError::InvalidTable("too few code lengths"));
        }
        Ok(Self::build(&lengths))
    }

    /// Assign codes: symbols are ordered by bit length, and codes are handed
    /// out from the longest down, counting up from zero in 16-bit space.
    fn build(lengths: &[u32]) -> Self {
        let mut order: Vec<usize> = (0..lengths.len()).collect();
        order.sort_by_key(|&sym| lengths[sym]);

        let mut codes = HashMap::with_capacity(lengths.len());
        let mut code: u32 = 0;
        let mut increment: u32 = 0;
        let mut last_len = 0;
        for &sym in order.iter().rev() {
            let len = lengths[sym];
            code = code.wrapping_add(increment) & 0xFFFF;
            if len != last_len {
                last_len = len;
                increment = 1 << (MAX_CODE_LEN - len);
            }
            codes.insert((len, code >> (MAX_CODE_LEN - len)), sym as u16);
        }
        Self { codes }
    }

    fn decode(&self, bits: &mut BitReader) -> Result<u16, DecodeError> {
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LEN {
            code = (code << 1) | bits.read_bits(1)?;
            if let Some(&sym) = self.codes.get(&(len, code)) {
                return Ok(sym);
            }
        }
        Err(DecodeError::InvalidCode(code))
    }
}

pub fn explode(
    input: &[u8],
    size: usize,
    large_window: bool,
    literal_tree: bool,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let mut bits = BitReader::new(input);

    let literals = if literal_tree {
        Some(Tree::read(&mut bits, LITERAL_SYMBOLS)?)
    } else {
        None
    };
    let lengths = Tree::read(&mut bits, LENGTH_SYMBOLS)?;
    let distances = Tree::read(&mut bits, DISTANCE_SYMBOLS)?;

    let low_bits = if large_window { 7 } else { 6 };
    let min_length = if literal_tree { 3 } else { 2 };

    while out.len() < size {
        if bits.read_bit()? {
            let byte = match &literals {
                Some(tree) => tree.decode(&mut bits)? as u8,
                None => bits.read_byte()?,
            };
            out.push(byte);
            continue;
        }

        let low = bits.read_bits(low_bits)? as usize;
        let high = distances.decode(&mut bits)? as usize;
        let distance = ((high << low_bits) | low) + 1;

        let mut length = lengths.decode(&mut bits)? as usize;
        if length == LONG_LENGTH as usize {
            length += bits.read_byte()? as usize;
        }
        copy_match(out, distance, length + min_length, size);
    }

    Ok(())
}
