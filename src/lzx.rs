//! LZX: LZ77 with Huffman-coded literals, lengths and aligned offset bits,
//! a three-entry repeated offset cache, and optional x86 call translation.

use tracing::{debug, trace};

use crate::bits::{BitOrder, BitReader};
use crate::error::{Error, Result};
use crate::huffman::HuffmanTable;
use crate::window::Window;

pub(crate) const MIN_WINDOW_BITS: u32 = 15;
pub(crate) const MAX_WINDOW_BITS: u32 = 21;

const NUM_CHARS: usize = 256;
const NUM_PRIMARY_LENGTHS: usize = 7;
const MIN_MATCH: usize = 2;
const NUM_SECONDARY_LENGTHS: usize = 249;
const NUM_ALIGNED_SYMBOLS: usize = 8;
const NUM_PRETREE_SYMBOLS: usize = 20;
const MAX_POSITION_SLOTS: usize = 50;
const MAX_MAIN_SYMBOLS: usize = NUM_CHARS + MAX_POSITION_SLOTS * 8;
// Repeat runs in the pretree encoding may spill past the end of a range.
const LENGTH_TABLE_SAFETY: usize = 64;

const PRETREE_TABLE_BITS: u32 = 6;
const MAIN_TABLE_BITS: u32 = 12;
const LENGTH_TABLE_BITS: u32 = 12;
const ALIGNED_TABLE_BITS: u32 = 7;

const E8_FRAME_LIMIT: u32 = 32768;

const fn extra_bits(slot: usize) -> u32 {
    if slot < 4 {
        0
    } else if slot < 36 {
        (slot / 2 - 1) as u32
    } else {
        17
    }
}

const POSITION_BASE: [u32; MAX_POSITION_SLOTS] = {
    let mut base = [0; MAX_POSITION_SLOTS];
    let mut slot = 1;
    while slot < MAX_POSITION_SLOTS {
        base[slot] = base[slot - 1] + (1 << extra_bits(slot - 1));
        slot += 1;
    }
    base
};

fn position_slots(window_bits: u32) -> usize {
    match window_bits {
        20 => 42,
        21 => 50,
        bits => 2 * bits as usize,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockType {
    Verbatim,
    Aligned,
    Uncompressed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Offset {
    MostRecent,
    SecondMostRecent,
    ThirdMostRecent,
    Absolute(u32),
}

/// The R0/R1/R2 repeated match offsets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RecentOffsets {
    r0: u32,
    r1: u32,
    r2: u32,
}

impl RecentOffsets {
    fn lookup(&mut self, offset: Offset) -> u32 {
        match offset {
            Offset::MostRecent => {}
            Offset::SecondMostRecent => std::mem::swap(&mut self.r0, &mut self.r1),
            Offset::ThirdMostRecent => std::mem::swap(&mut self.r0, &mut self.r2),
            Offset::Absolute(offset) => {
                self.r2 = self.r1;
                self.r1 = self.r0;
                self.r0 = offset;
            }
        }
        self.r0
    }
}

impl Default for RecentOffsets {
    fn default() -> Self {
        RecentOffsets { r0: 1, r1: 1, r2: 1 }
    }
}

/// Per-folder x86 call translation state.
#[derive(Clone, Copy, Debug, Default)]
struct E8Translation {
    file_size: i32,
    current_position: i32,
    started: bool,
    frames_read: u32,
}

pub(crate) struct LzxDecoder {
    window: Window,
    window_bits: u32,
    main_elements: usize,
    recent: RecentOffsets,
    header_read: bool,
    block_type: Option<BlockType>,
    block_length: usize,
    block_remaining: usize,
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    main_table: Option<HuffmanTable>,
    length_table: Option<HuffmanTable>,
    aligned_table: Option<HuffmanTable>,
    e8: E8Translation,
}

impl LzxDecoder {
    pub(crate) fn new(window_bits: u32) -> Result<LzxDecoder> {
        check_window_bits(window_bits)?;
        Ok(LzxDecoder {
            window: Window::new(1 << window_bits)?,
            window_bits,
            main_elements: NUM_CHARS + position_slots(window_bits) * 8,
            recent: RecentOffsets::default(),
            header_read: false,
            block_type: None,
            block_length: 0,
            block_remaining: 0,
            main_lengths: vec![0; MAX_MAIN_SYMBOLS + LENGTH_TABLE_SAFETY],
            length_lengths: vec![0; NUM_SECONDARY_LENGTHS + LENGTH_TABLE_SAFETY],
            main_table: None,
            length_table: None,
            aligned_table: None,
            e8: E8Translation::default(),
        })
    }

    /// Starts a new folder, keeping the window allocation if it is big
    /// enough.
    pub(crate) fn reconfigure(&mut self, window_bits: u32) -> Result<()> {
        check_window_bits(window_bits)?;
        self.window.reconfigure(1 << window_bits)?;
        self.window_bits = window_bits;
        self.main_elements = NUM_CHARS + position_slots(window_bits) * 8;
        self.recent = RecentOffsets::default();
        self.header_read = false;
        self.block_type = None;
        self.block_length = 0;
        self.block_remaining = 0;
        self.main_lengths.fill(0);
        self.length_lengths.fill(0);
        self.main_table = None;
        self.length_table = None;
        self.aligned_table = None;
        self.e8 = E8Translation::default();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn window_bits(&self) -> u32 {
        self.window_bits
    }

    /// Decodes one data block (an LZX frame) into `output`.
    pub(crate) fn decompress_block(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        let out_len = output.len();
        let mut reader = BitReader::new(input, BitOrder::MsbLe16);

        if !self.header_read {
            if reader.read_bit()? {
                let high = reader.read_bits(16)?;
                let low = reader.read_bits(16)?;
                self.e8.file_size = ((high << 16) | low) as i32;
            }
            self.header_read = true;
            debug!(file_size = self.e8.file_size, "LZX stream header");
        }

        self.window.wrap();
        if out_len > self.window.remaining() {
            data_format!(
                "LZX frame of {} bytes straddles the window end at {}",
                out_len,
                self.window.position
            );
        }

        let mut remaining = out_len;
        while remaining > 0 {
            if self.block_remaining == 0 {
                self.read_block_header(&mut reader)?;
            }
            reader.check_overrun()?;

            let run = self.block_remaining.min(remaining);
            remaining -= run;
            self.block_remaining -= run;
            match self.block_type {
                Some(BlockType::Verbatim) => self.decode_run(&mut reader, run, false)?,
                Some(BlockType::Aligned) => self.decode_run(&mut reader, run, true)?,
                Some(BlockType::Uncompressed) => {
                    let bytes = reader.read_raw(run).map_err(|_| {
                        Error::IllegalData(
                            "LZX uncompressed block runs past its input".to_string(),
                        )
                    })?;
                    self.window.push_slice(bytes);
                }
                None => illegal_data!("LZX data before any block header"),
            }
        }

        output.copy_from_slice(self.window.recent(out_len));
        self.translate_e8(output);
        Ok(())
    }

    fn read_block_header(&mut self, reader: &mut BitReader) -> Result<()> {
        if self.block_type == Some(BlockType::Uncompressed) {
            if self.block_length & 1 == 1 {
                reader.skip_raw(1)?;
            }
            reader.reset();
        }

        let kind = reader.read_bits(3)?;
        let high = reader.read_bits(16)? as usize;
        let low = reader.read_bits(8)? as usize;
        self.block_length = (high << 8) | low;
        self.block_remaining = self.block_length;
        trace!(kind, length = self.block_length, "LZX block header");

        let block_type = match kind {
            1 => BlockType::Verbatim,
            2 => BlockType::Aligned,
            3 => BlockType::Uncompressed,
            _ => illegal_data!("Invalid LZX block type {}", kind),
        };
        self.block_type = Some(block_type);

        match block_type {
            BlockType::Uncompressed => {
                self.e8.started = true;
                reader.align_for_raw()?;
                self.recent.r0 = reader.read_raw_u32()?;
                self.recent.r1 = reader.read_raw_u32()?;
                self.recent.r2 = reader.read_raw_u32()?;
            }
            BlockType::Aligned | BlockType::Verbatim => {
                if block_type == BlockType::Aligned {
                    let mut lengths = [0u8; NUM_ALIGNED_SYMBOLS];
                    for length in lengths.iter_mut() {
                        *length = reader.read_bits(3)? as u8;
                    }
                    self.aligned_table = Some(build_table(&lengths, ALIGNED_TABLE_BITS)?);
                }
                read_lengths(reader, &mut self.main_lengths, 0, NUM_CHARS)?;
                read_lengths(
                    reader,
                    &mut self.main_lengths,
                    NUM_CHARS,
                    self.main_elements,
                )?;
                self.main_table = Some(build_table(
                    &self.main_lengths[..self.main_elements],
                    MAIN_TABLE_BITS,
                )?);
                if self.main_lengths[0xe8] != 0 {
                    self.e8.started = true;
                }
                read_lengths(
                    reader,
                    &mut self.length_lengths,
                    0,
                    NUM_SECONDARY_LENGTHS,
                )?;
                self.length_table = Some(build_table(
                    &self.length_lengths[..NUM_SECONDARY_LENGTHS],
                    LENGTH_TABLE_BITS,
                )?);
            }
        }
        Ok(())
    }

    fn decode_run(
        &mut self,
        reader: &mut BitReader,
        run: usize,
        aligned: bool,
    ) -> Result<()> {
        let main = required(&self.main_table)?;
        let mut left = run;
        while left > 0 {
            let element = main.decode(reader)? as usize;
            if element < NUM_CHARS {
                self.window.push(element as u8);
                left -= 1;
                continue;
            }

            let element = element - NUM_CHARS;
            let mut length = element & NUM_PRIMARY_LENGTHS;
            if length == NUM_PRIMARY_LENGTHS {
                length += required(&self.length_table)?.decode(reader)? as usize;
            }
            length += MIN_MATCH;

            let slot = element >> 3;
            let offset = match slot {
                0 => Offset::MostRecent,
                1 => Offset::SecondMostRecent,
                2 => Offset::ThirdMostRecent,
                _ => {
                    let extra = extra_bits(slot);
                    let mut offset = POSITION_BASE[slot] - 2;
                    if aligned && extra >= 3 {
                        offset += reader.read_bits(extra - 3)? << 3;
                        offset +=
                            required(&self.aligned_table)?.decode(reader)? as u32;
                    } else {
                        offset += reader.read_bits(extra)?;
                    }
                    Offset::Absolute(offset)
                }
            };
            let distance = self.recent.lookup(offset) as usize;

            if length > left {
                illegal_data!(
                    "LZX match of {} bytes overruns the run ({} left)",
                    length,
                    left
                );
            }
            self.window.copy_match(distance, length)?;
            left -= length;
        }
        Ok(())
    }

    fn translate_e8(&mut self, output: &mut [u8]) {
        let frame = self.e8.frames_read;
        self.e8.frames_read = frame.saturating_add(1);
        if frame >= E8_FRAME_LIMIT || self.e8.file_size == 0 {
            return;
        }
        let len = output.len();
        if len <= 10 || !self.e8.started {
            self.e8.current_position =
                self.e8.current_position.wrapping_add(len as i32);
            return;
        }

        let file_size = self.e8.file_size;
        let mut position = self.e8.current_position;
        self.e8.current_position = position.wrapping_add(len as i32);
        let end = len - 10;
        let mut index = 0;
        while index < end {
            if output[index] != 0xe8 {
                index += 1;
                position = position.wrapping_add(1);
                continue;
            }
            let operand = &mut output[index + 1..index + 5];
            let absolute =
                i32::from_le_bytes([operand[0], operand[1], operand[2], operand[3]]);
            if absolute >= position.wrapping_neg() && absolute < file_size {
                let relative = if absolute >= 0 {
                    absolute.wrapping_sub(position)
                } else {
                    absolute.wrapping_add(file_size)
                };
                operand.copy_from_slice(&relative.to_le_bytes());
            }
            index += 5;
            position = position.wrapping_add(5);
        }
    }
}

fn check_window_bits(window_bits: u32) -> Result<()> {
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits) {
        data_format!("Invalid LZX window size 2^{}", window_bits);
    }
    Ok(())
}

fn required(table: &Option<HuffmanTable>) -> Result<&HuffmanTable> {
    match table {
        Some(table) => Ok(table),
        None => illegal_data!("LZX Huffman table used before it was read"),
    }
}

/// LZX tables must be complete, or empty when a tree goes unused.
fn build_table(lengths: &[u8], table_bits: u32) -> Result<HuffmanTable> {
    let table = HuffmanTable::build(lengths, table_bits, BitOrder::MsbLe16)?;
    if table.is_incomplete() && table.max_length() != 0 {
        illegal_data!("Incomplete LZX Huffman code");
    }
    Ok(table)
}

/// Updates `lengths[first..last]` from pretree-coded deltas.
fn read_lengths(
    reader: &mut BitReader,
    lengths: &mut [u8],
    first: usize,
    last: usize,
) -> Result<()> {
    let mut pretree_lengths = [0u8; NUM_PRETREE_SYMBOLS];
    for length in pretree_lengths.iter_mut() {
        *length = reader.read_bits(4)? as u8;
    }
    let pretree = build_table(&pretree_lengths, PRETREE_TABLE_BITS)?;

    let mut index = first;
    while index < last {
        let symbol = pretree.decode(reader)?;
        let (count, value) = match symbol {
            17 => (4 + reader.read_bits(4)? as usize, None),
            18 => (20 + reader.read_bits(5)? as usize, None),
            19 => {
                let count = 4 + reader.read_bits(1)? as usize;
                let delta = pretree.decode(reader)?;
                if delta > 16 {
                    illegal_data!("Invalid LZX pretree delta {}", delta);
                }
                (count, Some(delta as u8))
            }
            delta => (1, Some(delta as u8)),
        };
        if index + count > lengths.len() {
            illegal_data!("LZX code length run overflows the table");
        }
        match value {
            None => lengths[index..index + count].fill(0),
            Some(delta) => {
                let length = (lengths[index] + 17 - delta) % 17;
                lengths[index..index + count].fill(length);
            }
        }
        index += count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{extra_bits, position_slots, LzxDecoder, POSITION_BASE};
    use crate::error::Error;

    /// Packs bits the way an LZX encoder does: most significant bit first
    /// into 16-bit little-endian words, with raw byte runs in between.
    struct BitWriter {
        bytes: Vec<u8>,
        word: u16,
        count: u32,
    }

    impl BitWriter {
        fn new() -> BitWriter {
            BitWriter { bytes: Vec::new(), word: 0, count: 0 }
        }

        fn bits(&mut self, value: u32, count: u32) -> &mut Self {
            for i in (0..count).rev() {
                self.word = (self.word << 1) | ((value >> i) & 1) as u16;
                self.count += 1;
                if self.count == 16 {
                    self.bytes.extend_from_slice(&self.word.to_le_bytes());
                    self.word = 0;
                    self.count = 0;
                }
            }
            self
        }

        fn align(&mut self) -> &mut Self {
            let pad = 16 - self.count;
            self.bits(0, pad)
        }

        fn raw(&mut self, bytes: &[u8]) -> &mut Self {
            assert_eq!(self.count, 0);
            self.bytes.extend_from_slice(bytes);
            self
        }

        fn block_header(&mut self, kind: u32, length: u32) -> &mut Self {
            self.bits(kind, 3).bits(length >> 8, 16).bits(length & 0xff, 8)
        }

        fn uncompressed(&mut self, recent: [u32; 3], data: &[u8]) -> &mut Self {
            self.align();
            for r in recent {
                self.raw(&r.to_le_bytes());
            }
            self.raw(data);
            if data.len() % 2 == 1 {
                self.raw(&[0]);
            }
            self
        }

        // Pretree with symbol 0 => "1 bit", 16 => "10", 18 => "11", which is
        // enough to set lengths of 0 and 1 on a zeroed table.
        fn lengths(&mut self, lengths: &[u8]) -> &mut Self {
            for symbol in 0..20 {
                let length = match symbol {
                    0 => 1,
                    16 | 18 => 2,
                    _ => 0,
                };
                self.bits(length, 4);
            }
            let mut index = 0;
            while index < lengths.len() {
                if lengths[index] == 1 {
                    self.bits(0b10, 2);
                    index += 1;
                    continue;
                }
                let zeros = lengths[index..].iter().take_while(|&&l| l == 0).count();
                if zeros >= 20 {
                    let run = zeros.min(51);
                    self.bits(0b11, 2).bits((run - 20) as u32, 5);
                    index += run;
                } else {
                    self.bits(0, 1);
                    index += 1;
                }
            }
            self
        }

        fn finish(&mut self) -> Vec<u8> {
            if self.count > 0 {
                self.align();
            }
            std::mem::take(&mut self.bytes)
        }
    }

    // Main tree for a 2^15 window: just 'A' and a length-4 repeat of R0.
    const REPEAT_R0_LEN4: usize = 256 + 2;

    fn verbatim_tables(writer: &mut BitWriter) {
        let mut main = vec![0u8; 256 + position_slots(15) * 8];
        main[b'A' as usize] = 1;
        main[REPEAT_R0_LEN4] = 1;
        writer.lengths(&main[..256]).lengths(&main[256..]);
        writer.lengths(&[0; 249]);
    }

    fn decode(decoder: &mut LzxDecoder, input: &[u8], len: usize) -> Result<Vec<u8>, Error> {
        let mut output = vec![0u8; len];
        decoder.decompress_block(input, &mut output)?;
        Ok(output)
    }

    #[test]
    fn slot_tables() {
        assert_eq!(extra_bits(3), 0);
        assert_eq!(extra_bits(4), 1);
        assert_eq!(extra_bits(35), 16);
        assert_eq!(extra_bits(36), 17);
        assert_eq!(&POSITION_BASE[..10], &[0, 1, 2, 3, 4, 6, 8, 12, 16, 24]);
        assert_eq!(POSITION_BASE[49], 1_835_008);
        assert_eq!(position_slots(15), 30);
        assert_eq!(position_slots(20), 42);
        assert_eq!(position_slots(21), 50);
    }

    #[test]
    fn uncompressed_block_sets_repeated_offsets() {
        let mut writer = BitWriter::new();
        writer.bits(0, 1);
        writer.block_header(3, 8).uncompressed([5, 2, 3], b"abcdefgh");
        writer.block_header(1, 5);
        verbatim_tables(&mut writer);
        // R0 match (5 back, 4 long), then a literal.
        writer.bits(1, 1).bits(0, 1);
        let input = writer.finish();

        let mut decoder = LzxDecoder::new(15).unwrap();
        let output = decode(&mut decoder, &input, 13).unwrap();
        assert_eq!(output, b"abcdefghdefgA");
    }

    #[test]
    fn odd_uncompressed_block_is_padded() {
        let mut writer = BitWriter::new();
        writer.bits(0, 1);
        writer.block_header(3, 3).uncompressed([1, 1, 1], b"xyz");
        writer.block_header(3, 2).uncompressed([1, 1, 1], b"!!");
        let input = writer.finish();
        let mut decoder = LzxDecoder::new(16).unwrap();
        assert_eq!(decode(&mut decoder, &input, 5).unwrap(), b"xyz!!");
    }

    #[test]
    fn match_longer_than_run_is_illegal() {
        let mut writer = BitWriter::new();
        writer.bits(0, 1).block_header(1, 2);
        verbatim_tables(&mut writer);
        writer.bits(0, 1).bits(1, 1);
        let input = writer.finish();
        let mut decoder = LzxDecoder::new(15).unwrap();
        let result = decode(&mut decoder, &input, 2);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn invalid_block_type_is_illegal() {
        let input = BitWriter::new().bits(0, 1).block_header(5, 10).finish();
        let mut decoder = LzxDecoder::new(15).unwrap();
        let result = decode(&mut decoder, &input, 10);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn e8_translation_spans_frames() {
        let mut first = vec![0x90, 0xe8, 0x10, 0, 0, 0];
        first.extend_from_slice(&[0x90, 0x90, 0xe8, 1, 2, 3, 4, 0x90, 0x90, 0x90]);
        let mut second = vec![0xe8, 0xf0, 0xff, 0xff, 0xff];
        second.extend_from_slice(&[0x90; 11]);

        let mut writer = BitWriter::new();
        writer.bits(1, 1).bits(0x0001, 16).bits(0x0000, 16);
        writer.block_header(3, 32).align();
        for r in [1u32, 1, 1] {
            writer.raw(&r.to_le_bytes());
        }
        writer.raw(&first);
        let frame1 = writer.finish();

        let mut decoder = LzxDecoder::new(15).unwrap();
        let output = decode(&mut decoder, &frame1, 16).unwrap();
        assert_eq!(&output[..6], &[0x90, 0xe8, 0x0f, 0, 0, 0]);
        // Too close to the end of the frame to be translated.
        assert_eq!(&output[6..], &first[6..]);

        let output = decode(&mut decoder, &second, 16).unwrap();
        assert_eq!(&output[..5], &[0xe8, 0xf0, 0xff, 0x00, 0x00]);
        assert_eq!(&output[5..], &second[5..]);
    }

    #[test]
    fn no_translation_without_file_size() {
        let data = [0xe8, 0x10, 0, 0, 0, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90];
        let mut writer = BitWriter::new();
        writer.bits(0, 1).block_header(3, 12).uncompressed([1, 1, 1], &data);
        let input = writer.finish();
        let mut decoder = LzxDecoder::new(15).unwrap();
        assert_eq!(decode(&mut decoder, &input, 12).unwrap(), data);
    }

    #[test]
    fn window_size_limits_and_reuse() {
        assert!(matches!(LzxDecoder::new(14), Err(Error::DataFormat(_))));
        assert!(matches!(LzxDecoder::new(22), Err(Error::DataFormat(_))));
        let mut decoder = LzxDecoder::new(17).unwrap();
        decoder.reconfigure(15).unwrap();
        assert_eq!(decoder.window_bits(), 15);
        assert!(matches!(decoder.reconfigure(9), Err(Error::DataFormat(_))));
    }
}
