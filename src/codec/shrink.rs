//! Shrink (ZIP method 1).
//!
//! LZW with code sizes growing from 9 to 13 bits under explicit control
//! codes. Code 256 is followed by a sub-code: 1 widens codes by one bit,
//! 2 performs a partial clear, which frees every code that is not the prefix
//! of another code. New codes always take the lowest free slot.
//!
//! Strings are not stored in the table; each code remembers where its
//! string was last written in the output, so expanding a code is a copy
//! from earlier output.

use std::collections::VecDeque;

use super::DecodeError;
use super::bits::BitReader;

const CONTROL_CODE: usize = 256;
const FIRST_FREE: usize = 257;
const MIN_CODE_SIZE: u32 = 9;
const MAX_CODE_SIZE: u32 = 13;
const MAX_CODE: usize = (1 << MAX_CODE_SIZE) - 1;
const NO_PREFIX: u16 = u16::MAX;

const CONTROL_WIDEN: u32 = 1;
const CONTROL_PARTIAL_CLEAR: u32 = 2;

#[derive(Clone, Copy)]
struct Node {
    prefix: u16,
    pos: usize,
    len: usize,
}

struct CodeTable {
    nodes: Vec<Node>,
    free: VecDeque<usize>,
}

impl CodeTable {
    fn new() -> Self {
        let mut nodes = vec![
            Node {
                prefix: NO_PREFIX,
                pos: 0,
                len: 0,
            };
            MAX_CODE + 1
        ];
        for node in nodes.iter_mut().take(CONTROL_CODE) {
            node.len = 1;
        }
        Self {
            nodes,
            free: (FIRST_FREE..=MAX_CODE).collect(),
        }
    }

    fn is_defined(&self, code: usize) -> bool {
        code < CONTROL_CODE || (code > CONTROL_CODE && self.nodes[code].prefix != NO_PREFIX)
    }

    fn partial_clear(&mut self) {
        let mut is_prefix = vec![false; MAX_CODE + 1];
        for node in &self.nodes[FIRST_FREE..] {
            if node.prefix != NO_PREFIX {
                is_prefix[node.prefix as usize] = true;
            }
        }
        for code in FIRST_FREE..=MAX_CODE {
            if !is_prefix[code] {
                self.nodes[code].prefix = NO_PREFIX;
            }
        }
        self.free = (FIRST_FREE..=MAX_CODE)
            .filter(|&code| self.nodes[code].prefix == NO_PREFIX)
            .collect();
    }
}

pub fn unshrink(input: &[u8], size: usize, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    if size == 0 {
        return Ok(());
    }
    let mut bits = BitReader::new(input);
    let mut table = CodeTable::new();
    let mut code_size = MIN_CODE_SIZE;

    let first = bits.read_bits(code_size)? as usize;
    if first >= CONTROL_CODE {
        return Err(DecodeError::InvalidCode(first as u32));
    }
    table.nodes[first].pos = out.len();
    out.push(first as u8);
    let mut prev = first;

    while out.len() < size {
        let code = bits.read_bits(code_size)? as usize;
        if code == CONTROL_CODE {
            match bits.read_bits(code_size)? {
                CONTROL_WIDEN if code_size < MAX_CODE_SIZE => code_size += 1,
                CONTROL_PARTIAL_CLEAR => table.partial_clear(),
                other => return Err(DecodeError::InvalidCode(other)),
            }
            continue;
        }

        let start = out.len();
        if code < CONTROL_CODE {
            out.push(code as u8);
        } else if table.is_defined(code) {
            let node = table.nodes[code];
            out.extend_from_within(node.pos..node.pos + node.len);
        } else if table.free.front() == Some(&code) {
            // KwKwK: the code being defined is used immediately
            let node = table.nodes[prev];
            out.extend_from_within(node.pos..node.pos + node.len);
            let first_byte = out[start];
            out.push(first_byte);
        } else {
            return Err(DecodeError::InvalidCode(code as u32));
        }

        if let Some(new_code) = table.free.pop_front() {
            let prefix = table.nodes[prev];
            table.nodes[new_code] = Node {
                prefix: prev as u16,
                pos: prefix.pos,
                len: prefix.len + 1,
            };
        }

        table.nodes[code].pos = start;
        table.nodes[code].len = out.len() - start;
        prev = code;
    }

    Ok(())
}
