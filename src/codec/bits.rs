//! Bit reader for legacy compressed streams.
//!
//! Every bit-oriented method handled here (Shrink, Reduce, Implode,
//! Squeeze, dynamic LZW) packs its bitstream least-significant bit first.

use super::DecodeError;

/// Bit reader that reads from a byte slice, LSB first.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Current bit buffer
    buffer: u64,
    /// Bits available in buffer
    bits_in_buffer: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            buffer: 0,
            bits_in_buffer: 0,
        }
    }

    fn fill_buffer(&mut self) {
        while self.bits_in_buffer <= 56 && self.pos < self.data.len() {
            self.buffer |= (self.data[self.pos] as u64) << self.bits_in_buffer;
            self.bits_in_buffer += 8;
            self.pos += 1;
        }
    }

    /// Read `n` bits (at most 32).
    #[inline]
    pub fn read_bits(&mut self, n: u32) -> Result<u32, DecodeError> {
        debug_assert!(n <= 32);
        if n == 0 {
            return Ok(0);
        }
        if self.bits_in_buffer < n {
            self.fill_buffer();
            if self.bits_in_buffer < n {
                return Err(DecodeError::UnexpectedEof);
            }
        }
        let value = (self.buffer & ((1u64 << n) - 1)) as u32;
        self.buffer >>= n;
        self.bits_in_buffer -= n;
        Ok(value)
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_bits(1)? != 0)
    }

    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Remaining bits available.
    pub fn remaining_bits(&self) -> u64 {
        self.bits_in_buffer as u64 + ((self.data.len() - self.pos) as u64 * 8)
    }
}

/// LSB-first bit writer used to synthesize streams in tests.
#[cfg(test)]
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: u32,
}

#[cfg(test)]
impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the low `n` bits of `value`, least significant first.
    pub fn write_bits(&mut self, value: u32, n: u32) {
        for i in 0..n {
            if self.bit == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 != 0 {
                *self.bytes.last_mut().unwrap() |= 1 << self.bit;
            }
            self.bit = (self.bit + 1) % 8;
        }
    }

    /// Write a prefix code whose first transmitted bit is its most
    /// significant one.
    pub fn write_code(&mut self, code: u32, len: u32) {
        for i in (0..len).rev() {
            self.write_bits((code >> i) & 1, 1);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
