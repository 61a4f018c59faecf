//! Reduce (ZIP methods 2-5, compression factors 1-4).
//!
//! The stream opens with 256 follower sets, stored from byte value 255 down
//! to 0: a 6-bit count followed by that many 8-bit followers. Each following
//! byte is either a literal (flag bit 1, or an empty follower set) or an
//! index into the follower set of the previously read byte.
//!
//! The byte sequence then runs through a small state machine: DLE (0x90)
//! introduces a back-reference whose length and distance are packed into the
//! next one or two bytes according to the compression factor.

use super::bits::BitReader;
use super::{DecodeError, copy_match};

const DLE: u8 = 0x90;
const MAX_FOLLOWERS: usize = 32;

enum State {
    Literal,
    Escaped,
    ExtraLength,
    Distance,
}

/// Bits needed to index a follower set of `n` entries.
fn index_bits(n: usize) -> u32 {
    (usize::BITS - (n - 1).leading_zeros()).max(1)
}

pub fn expand(input: &[u8], size: usize, factor: u8, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    if !(1..=4).contains(&factor) {
        return Err(DecodeError::InvalidTable("reduce factor"));
    }
    let mut bits = BitReader::new(input);

    let mut followers: Vec<Vec<u8>> = vec![Vec::new(); 256];
    for set in followers.iter_mut().rev() {
        let count = bits.read_bits(6)? as usize;
        if count > MAX_FOLLOWERS {
            return Err(DecodeError::InvalidTable("follower set larger than 32"));
        }
        for _ in 0..count {
            set.push(bits.read_byte()?);
        }
    }

    let length_mask = 0xFFu8 >> factor;
    let mut state = State::Literal;
    let mut last = 0u8;
    let mut packed = 0u8;
    let mut length = 0usize;

    while out.len() < size {
        let set = &followers[last as usize];
        let c = if set.is_empty() || bits.read_bit()? {
            bits.read_byte()?
        } else {
            let index = bits.read_bits(index_bits(set.len()))? as usize;
            *set.get(index).ok_or(DecodeError::InvalidCode(index as u32))?
        };
        last = c;

        state = match state {
            State::Literal if c == DLE => State::Escaped,
            State::Literal => {
                out.push(c);
                State::Literal
            }
            State::Escaped if c == 0 => {
                out.push(DLE);
                State::Literal
            }
            State::Escaped => {
                packed = c;
                length = (c & length_mask) as usize;
                if length == length_mask as usize {
                    State::ExtraLength
                } else {
                    State::Distance
                }
            }
            State::ExtraLength => {
                length += c as usize;
                State::Distance
            }
            State::Distance => {
                let distance = (((packed >> (8 - factor)) as usize) << 8) + c as usize + 1;
                copy_match(out, distance, length + 3, size);
                State::Literal
            }
        };
    }

    Ok(())
}
