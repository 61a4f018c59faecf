//! ARC Pack (method 3) and Squeeze (method 4), plus the RLE90 stage shared
//! by most ARC methods.

use super::DecodeError;
use super::bits::BitReader;

const DLE: u8 = 0x90;
const SQUEEZE_EOF: i32 = 256;
const MAX_SQUEEZE_NODES: usize = 256;

/// Run-length expansion with 0x90 as the repeat marker.
///
/// `0x90 0x00` is a literal 0x90; `0x90 n` repeats the previous byte so that
/// it appears `n` times in total.
#[derive(Debug, Default)]
pub(super) struct Rle90 {
    last: u8,
    escaped: bool,
}

impl Rle90 {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Feed one byte, writing at most up to `limit` bytes of output.
    pub(super) fn push(&mut self, byte: u8, out: &mut Vec<u8>, limit: usize) {
        if self.escaped {
            self.escaped = false;
            if byte == 0 {
                if out.len() < limit {
                    out.push(DLE);
                }
            } else {
                let repeat = (byte as usize - 1).min(limit.saturating_sub(out.len()));
                out.extend(std::iter::repeat_n(self.last, repeat));
            }
        } else if byte == DLE {
            self.escaped = true;
        } else {
            self.last = byte;
            if out.len() < limit {
                out.push(byte);
            }
        }
    }
}

pub fn unpack(input: &[u8], size: usize, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    let mut rle = Rle90::new();
    for &byte in input {
        if out.len() >= size {
            break;
        }
        rle.push(byte, out, size);
    }
    Ok(())
}

pub fn unsqueeze(input: &[u8], size: usize, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    if input.len() < 2 {
        return Err(DecodeError::UnexpectedEof);
    }
    let count = u16::from_le_bytes([input[0], input[1]]) as usize;
    if count > MAX_SQUEEZE_NODES {
        return Err(DecodeError::InvalidTable("more than 256 squeeze nodes"));
    }
    let table_end = 2 + count * 4;
    let table = input
        .get(2..table_end)
        .ok_or(DecodeError::UnexpectedEof)?;
    let nodes: Vec<[i32; 2]> = table
        .chunks_exact(4)
        .map(|n| {
            [
                i16::from_le_bytes([n[0], n[1]]) as i32,
                i16::from_le_bytes([n[2], n[3]]) as i32,
            ]
        })
        .collect();
    if nodes.is_empty() {
        return Ok(());
    }

    let mut bits = BitReader::new(&input[table_end..]);
    let mut rle = Rle90::new();
    while out.len() < size {
        let mut node = 0usize;
        let symbol = loop {
            let child = nodes[node][bits.read_bit()? as usize];
            if child < 0 {
                break -(child + 1);
            }
            node = child as usize;
            if node >= nodes.len() {
                return Err(DecodeError::InvalidCode(child as u32));
            }
        };
        if symbol == SQUEEZE_EOF {
            break;
        }
        if symbol > SQUEEZE_EOF {
            return Err(DecodeError::InvalidCode(symbol as u32));
        }
        rle.push(symbol as u8, out, size);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rle_repeat_and_literal_marker() {
        let mut out = Vec::new();
        unpack(&[b'a', DLE, 4, b'b', DLE, 0, b'c'], 100, &mut out).unwrap();
        assert_eq!(out, vec![b'a', b'a', b'a', b'a', b'b', DLE, b'c']);
    }

    #[test]
    fn test_rle_literal_marker_keeps_previous_byte() {
        let mut out = Vec::new();
        unpack(&[b'x', DLE, 0, DLE, 3], 100, &mut out).unwrap();
        assert_eq!(out, vec![b'x', DLE, b'x', b'x']);
    }

    #[test]
    fn test_rle_stops_at_size() {
        let mut out = Vec::new();
        unpack(&[b'z', DLE, 255], 10, &mut out).unwrap();
        assert_eq!(out, vec![b'z'; 10]);
    }

    #[test]
    fn test_unsqueeze() {
        // node 0: 0 -> 'A', 1 -> node 1; node 1: 0 -> 'B', 1 -> EOF
        let mut data = vec![2, 0];
        for value in [-66i16, 1, -67, -257] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        // A=0, B=10, A=0, EOF=11, read least significant bit first
        data.push(0b0011_0010);
        let mut out = Vec::new();
        unsqueeze(&data, 3, &mut out).unwrap();
        assert_eq!(out, b"ABA");
    }

    #[test]
    fn test_unsqueeze_rejects_oversized_tree() {
        let data = [0x01, 0x01];
        let mut out = Vec::new();
        assert!(matches!(
            unsqueeze(&data, 1, &mut out),
            Err(DecodeError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_unsqueeze_truncated_tree() {
        let data = [4, 0, 1, 2];
        let mut out = Vec::new();
        assert_eq!(
            unsqueeze(&data, 1, &mut out),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn test_unsqueeze_reference_stream() {
        let expected = include_bytes!("../../__fixtures__/legacy/lorem.txt.expected");
        let data = include_bytes!("../../__fixtures__/legacy/lorem.squeezed");
        let mut out = Vec::new();
        unsqueeze(data, expected.len(), &mut out).unwrap();
        assert_eq!(out, expected.as_slice());
    }
}
