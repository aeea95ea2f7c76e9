use crate::bits::{BitOrder, BitReader};
use crate::error::Result;

pub(crate) const MAX_CODE_LENGTH: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Entry {
    Invalid,
    Symbol { symbol: u16, length: u8 },
    Link { offset: u32 },
}

/// A canonical Huffman decoding table.
///
/// Codes no longer than the primary width are resolved with one lookup;
/// longer codes go through a second-level table covering the remaining bits
/// up to the longest code.
#[derive(Clone, Debug)]
pub(crate) struct HuffmanTable {
    entries: Vec<Entry>,
    primary_bits: u32,
    secondary_bits: u32,
    max_length: u32,
    incomplete: bool,
}

impl HuffmanTable {
    /// Builds a table from one code length per symbol (zero meaning unused).
    ///
    /// Over-subscribed length sets are rejected.  Incomplete sets are
    /// accepted and reported through [`HuffmanTable::is_incomplete`]; codes
    /// that were never assigned decode as illegal data.
    pub(crate) fn build(
        lengths: &[u8],
        table_bits: u32,
        order: BitOrder,
    ) -> Result<HuffmanTable> {
        let mut counts = [0u32; MAX_CODE_LENGTH + 1];
        for &length in lengths {
            if length as usize > MAX_CODE_LENGTH {
                illegal_data!("Huffman code length {} is too long", length);
            }
            counts[length as usize] += 1;
        }
        counts[0] = 0;
        let max_length = (1..=MAX_CODE_LENGTH)
            .rev()
            .find(|&length| counts[length] != 0)
            .unwrap_or(0) as u32;

        let mut left: i64 = 1;
        for &count in &counts[1..=max_length as usize] {
            left = (left << 1) - count as i64;
            if left < 0 {
                illegal_data!("Huffman code lengths are over-subscribed");
            }
        }
        let incomplete = max_length == 0 || left > 0;

        let mut next_code = [0u32; MAX_CODE_LENGTH + 2];
        let mut code = 0u32;
        for length in 1..=MAX_CODE_LENGTH {
            code = (code + counts[length - 1]) << 1;
            next_code[length] = code;
        }

        let primary_bits = table_bits.min(max_length);
        let secondary_bits = max_length - primary_bits;
        let mut entries = vec![Entry::Invalid; 1 << primary_bits];
        for (symbol, &length) in lengths.iter().enumerate() {
            if length == 0 {
                continue;
            }
            let length = length as u32;
            let code = next_code[length as usize];
            next_code[length as usize] += 1;

            if length <= primary_bits {
                let entry = Entry::Symbol { symbol: symbol as u16, length: length as u8 };
                fill(&mut entries, 0, primary_bits, code, length, order, entry);
                continue;
            }

            let rest = length - primary_bits;
            let head = code >> rest;
            let index = slot_index(head, primary_bits, primary_bits, order);
            let offset = match entries[index] {
                Entry::Link { offset } => offset,
                _ => {
                    let offset = entries.len() as u32;
                    entries.resize(entries.len() + (1 << secondary_bits), Entry::Invalid);
                    entries[index] = Entry::Link { offset };
                    offset
                }
            };
            let tail = code & ((1 << rest) - 1);
            let entry = Entry::Symbol { symbol: symbol as u16, length: rest as u8 };
            fill(&mut entries, offset as usize, secondary_bits, tail, rest, order, entry);
        }

        Ok(HuffmanTable { entries, primary_bits, secondary_bits, max_length, incomplete })
    }

    /// True if the code lengths left part of the code space unassigned
    /// (including the case where every length is zero).
    pub(crate) fn is_incomplete(&self) -> bool {
        self.incomplete
    }

    pub(crate) fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Reads one symbol from `reader`.
    pub(crate) fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let index = reader.peek(self.primary_bits)? as usize;
        match self.entries[index] {
            Entry::Symbol { symbol, length } => {
                reader.consume(length as u32);
                Ok(symbol)
            }
            Entry::Link { offset } => {
                reader.consume(self.primary_bits);
                let index = reader.peek(self.secondary_bits)? as usize;
                match self.entries[offset as usize + index] {
                    Entry::Symbol { symbol, length } => {
                        reader.consume(length as u32);
                        Ok(symbol)
                    }
                    _ => illegal_data!("Invalid Huffman code"),
                }
            }
            Entry::Invalid => illegal_data!("Invalid Huffman code"),
        }
    }
}

// Maps the `length`-bit canonical code onto the value a `width`-bit peek
// returns when the code sits at the front of the stream, with the bits that
// follow the code taken as zero.
fn slot_index(code: u32, length: u32, width: u32, order: BitOrder) -> usize {
    match order {
        BitOrder::Lsb => reverse_bits(code, length) as usize,
        _ => (code << (width - length)) as usize,
    }
}

fn fill(
    entries: &mut [Entry],
    base: usize,
    width: u32,
    code: u32,
    length: u32,
    order: BitOrder,
    entry: Entry,
) {
    let first = slot_index(code, length, width, order);
    for filler in 0..(1usize << (width - length)) {
        let index = match order {
            BitOrder::Lsb => first | (filler << length),
            _ => first | filler,
        };
        entries[base + index] = entry;
    }
}

fn reverse_bits(code: u32, length: u32) -> u32 {
    if length == 0 {
        0
    } else {
        code.reverse_bits() >> (32 - length)
    }
}
