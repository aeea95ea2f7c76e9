//! MSZIP: one DEFLATE stream per data block, each prefixed with "CK".
//! Back-references may reach into the previous block's output.

use tracing::trace;

use crate::bits::{BitOrder, BitReader};
use crate::consts;
use crate::error::Result;
use crate::huffman::HuffmanTable;
use crate::window::Window;

const MSZIP_SIGNATURE: &[u8; 2] = b"CK";
const WINDOW_SIZE: usize = 0x8000;

const LITERAL_TABLE_BITS: u32 = 9;
const DISTANCE_TABLE_BITS: u32 = 6;
const CODE_LENGTH_TABLE_BITS: u32 = 7;

const NUM_CODE_LENGTHS: usize = 19;
const CODE_LENGTH_ORDER: [usize; NUM_CODE_LENGTHS] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59,
    67, 83, 99, 115, 131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5,
    5, 5, 5, 0,
];
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513,
    769, 1025, 1537, 2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10,
    11, 11, 12, 12, 13, 13,
];

pub(crate) struct MsZipDecoder {
    window: Window,
    fixed_tables: Option<(HuffmanTable, HuffmanTable)>,
}

impl MsZipDecoder {
    pub(crate) fn new() -> Result<MsZipDecoder> {
        Ok(MsZipDecoder {
            window: Window::new(WINDOW_SIZE)?,
            fixed_tables: None,
        })
    }

    /// Decodes one data block into `output`, whose length is the block's
    /// declared uncompressed size.
    pub(crate) fn decompress_block(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        let out_len = output.len();
        if out_len > consts::MAX_BLOCK_SIZE {
            data_format!("MSZIP block expands to {} bytes", out_len);
        }
        if input.len() < MSZIP_SIGNATURE.len()
            || &input[..MSZIP_SIGNATURE.len()] != MSZIP_SIGNATURE
        {
            illegal_data!("Invalid MSZIP block signature");
        }
        let mut reader =
            BitReader::new(&input[MSZIP_SIGNATURE.len()..], BitOrder::Lsb);
        self.window.position = 0;
        loop {
            if self.window.position == out_len && reader.is_exhausted() {
                break;
            }
            if self.inflate_block(&mut reader)? {
                break;
            }
        }
        if self.window.position != out_len {
            illegal_data!(
                "MSZIP block produced {} bytes instead of {}",
                self.window.position,
                out_len
            );
        }
        output.copy_from_slice(self.window.recent(out_len));
        Ok(())
    }

    /// Decodes one DEFLATE block; returns true if it was marked final.
    fn inflate_block(&mut self, reader: &mut BitReader) -> Result<bool> {
        let is_final = reader.read_bit()?;
        let block_type = reader.read_bits(2)?;
        trace!(block_type, is_final, "inflating block");
        match block_type {
            0 => self.inflate_stored(reader)?,
            1 => {
                let tables = match self.fixed_tables.take() {
                    Some(tables) => tables,
                    None => fixed_tables()?,
                };
                let result =
                    inflate_codes(&mut self.window, reader, &tables.0, &tables.1);
                self.fixed_tables = Some(tables);
                result?;
            }
            2 => {
                let (literals, distances) = read_dynamic_tables(reader)?;
                inflate_codes(&mut self.window, reader, &literals, &distances)?;
            }
            _ => illegal_data!("Invalid DEFLATE block type {}", block_type),
        }
        Ok(is_final)
    }

    fn inflate_stored(&mut self, reader: &mut BitReader) -> Result<()> {
        reader.align_to_byte();
        let length = reader.read_bits(16)?;
        let complement = reader.read_bits(16)?;
        if length != (!complement & 0xffff) {
            illegal_data!("Stored block length check failed");
        }
        let length = length as usize;
        if length > self.window.remaining() {
            illegal_data!("Stored block overflows the MSZIP window");
        }
        for _ in 0..length {
            let byte = reader.read_bits(8)? as u8;
            self.window.push(byte);
        }
        Ok(())
    }
}

fn fixed_tables() -> Result<(HuffmanTable, HuffmanTable)> {
    let mut lengths = [0u8; 288];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    let literals =
        HuffmanTable::build(&lengths, LITERAL_TABLE_BITS, BitOrder::Lsb)?;
    let distances =
        HuffmanTable::build(&[5u8; 30], DISTANCE_TABLE_BITS, BitOrder::Lsb)?;
    Ok((literals, distances))
}

fn read_dynamic_tables(
    reader: &mut BitReader,
) -> Result<(HuffmanTable, HuffmanTable)> {
    let num_literals = 257 + reader.read_bits(5)? as usize;
    let num_distances = 1 + reader.read_bits(5)? as usize;
    let num_code_lengths = 4 + reader.read_bits(4)? as usize;
    if num_literals > 288 || num_distances > 32 {
        illegal_data!(
            "Too many DEFLATE codes ({} literal, {} distance)",
            num_literals,
            num_distances
        );
    }

    let mut code_lengths = [0u8; NUM_CODE_LENGTHS];
    for &symbol in &CODE_LENGTH_ORDER[..num_code_lengths] {
        code_lengths[symbol] = reader.read_bits(3)? as u8;
    }
    // The code length code may legitimately leave part of its space unused.
    let code_length_table = HuffmanTable::build(
        &code_lengths,
        CODE_LENGTH_TABLE_BITS,
        BitOrder::Lsb,
    )?;

    let total = num_literals + num_distances;
    let mut lengths = vec![0u8; total];
    let mut index = 0;
    let mut previous = 0u8;
    while index < total {
        let symbol = code_length_table.decode(reader)?;
        let (value, count) = match symbol {
            0..=15 => {
                previous = symbol as u8;
                (previous, 1)
            }
            16 => (previous, 3 + reader.read_bits(2)? as usize),
            17 => {
                previous = 0;
                (0, 3 + reader.read_bits(3)? as usize)
            }
            _ => {
                previous = 0;
                (0, 11 + reader.read_bits(7)? as usize)
            }
        };
        if index + count > total {
            illegal_data!("DEFLATE code length repeat runs past the end");
        }
        lengths[index..index + count].fill(value);
        index += count;
    }

    let literals = HuffmanTable::build(
        &lengths[..num_literals],
        LITERAL_TABLE_BITS,
        BitOrder::Lsb,
    )?;
    if literals.is_incomplete() && literals.max_length() != 1 {
        illegal_data!("Incomplete DEFLATE literal/length code");
    }
    let distances = HuffmanTable::build(
        &lengths[num_literals..],
        DISTANCE_TABLE_BITS,
        BitOrder::Lsb,
    )?;
    // No distance codes at all, or a lone one-bit code, is still legal.
    if distances.is_incomplete() && distances.max_length() > 1 {
        illegal_data!("Incomplete DEFLATE distance code");
    }
    Ok((literals, distances))
}

fn inflate_codes(
    window: &mut Window,
    reader: &mut BitReader,
    literals: &HuffmanTable,
    distances: &HuffmanTable,
) -> Result<()> {
    loop {
        let symbol = literals.decode(reader)? as usize;
        if symbol < 256 {
            if window.remaining() == 0 {
                illegal_data!("Literal overflows the MSZIP window");
            }
            window.push(symbol as u8);
            continue;
        }
        if symbol == 256 {
            return Ok(());
        }
        let index = symbol - 257;
        if index >= LENGTH_BASE.len() {
            illegal_data!("Invalid DEFLATE length code {}", symbol);
        }
        let length = LENGTH_BASE[index] as usize
            + reader.read_bits(LENGTH_EXTRA[index] as u32)? as usize;
        let code = distances.decode(reader)? as usize;
        if code >= DISTANCE_BASE.len() {
            illegal_data!("Invalid DEFLATE distance code {}", code);
        }
        let distance = DISTANCE_BASE[code] as usize
            + reader.read_bits(DISTANCE_EXTRA[code] as u32)? as usize;
        if length > window.remaining() {
            illegal_data!("Match overflows the MSZIP window");
        }
        window.copy_match(distance, length)?;
    }
}

#[cfg(test)]
mod tests {
    use flate2::Compression;
    use rand::rngs::SmallRng;
    use rand::{RngCore, SeedableRng};

    use super::{MsZipDecoder, CODE_LENGTH_ORDER, WINDOW_SIZE};
    use crate::error::Error;

    // Produces MSZIP blocks the way a cabinet writer would: one shared
    // DEFLATE state, a sync flush plus an empty final block after each
    // chunk, and a stored block whenever compression does not pay off.
    fn compress(mut data: &[u8]) -> Vec<(usize, Vec<u8>)> {
        let mut compressor = flate2::Compress::new(Compression::best(), false);
        let mut blocks = Vec::new();
        loop {
            let chunk = &data[..data.len().min(WINDOW_SIZE)];
            data = &data[chunk.len()..];
            let is_last = data.is_empty();
            let mut out = Vec::with_capacity(0xffff);
            out.extend_from_slice(b"CK");
            let flush = if is_last {
                flate2::FlushCompress::Finish
            } else {
                flate2::FlushCompress::Sync
            };
            compressor.compress_vec(chunk, &mut out, flush).unwrap();
            if !is_last {
                out.extend_from_slice(&[0x03, 0x00]);
            }
            if out.len() > chunk.len() + 7 {
                out.truncate(2);
                out.push(1);
                out.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
                out.extend_from_slice(&(!(chunk.len() as u16)).to_le_bytes());
                out.extend_from_slice(chunk);
            }
            blocks.push((chunk.len(), out));
            if is_last {
                return blocks;
            }
        }
    }

    fn decompress(blocks: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = Vec::new();
        for (size, block) in blocks {
            let mut buffer = vec![0u8; *size];
            decoder.decompress_block(block, &mut buffer).unwrap();
            output.extend_from_slice(&buffer);
        }
        output
    }

    /// Packs DEFLATE fields least significant bit first.
    #[derive(Default)]
    struct BitPacker {
        bytes: Vec<u8>,
        used: u32,
    }

    impl BitPacker {
        fn put(&mut self, value: u32, count: u32) {
            for bit in 0..count {
                if self.used % 8 == 0 {
                    self.bytes.push(0);
                }
                let last = self.bytes.len() - 1;
                self.bytes[last] |= (((value >> bit) & 1) as u8) << (self.used % 8);
                self.used += 1;
            }
        }

        // Huffman codes go out starting from their most significant bit.
        fn put_code(&mut self, code: u32, length: u32) {
            for bit in (0..length).rev() {
                self.put(code >> bit, 1);
            }
        }
    }

    /// A dynamic block that emits a single "a".  Literal 'a' and
    /// end-of-block get one-bit codes; the lone distance code gets
    /// `distance_length` bits.
    fn dynamic_block_with_one_distance(distance_length: u32) -> Vec<u8> {
        let mut bits = BitPacker::default();
        bits.put(1, 1);
        bits.put(2, 2);
        bits.put(0, 5); // 257 literal/length codes
        bits.put(0, 5); // 1 distance code
        bits.put(14, 4); // 18 code length codes
        for &symbol in &CODE_LENGTH_ORDER[..18] {
            let length = match symbol {
                0 | 1 | 2 | 18 => 2,
                _ => 0,
            };
            bits.put(length, 3);
        }
        // Code length codes: 0 -> 00, 1 -> 01, 2 -> 10, 18 -> 11.
        bits.put_code(3, 2);
        bits.put(97 - 11, 7);
        bits.put_code(1, 2);
        bits.put_code(3, 2);
        bits.put(138 - 11, 7);
        bits.put_code(3, 2);
        bits.put(20 - 11, 7);
        bits.put_code(1, 2);
        bits.put_code(distance_length, 2);
        bits.put_code(0, 1);
        bits.put_code(1, 1);
        let mut block = b"CK".to_vec();
        block.extend_from_slice(&bits.bytes);
        block.push(0);
        block
    }

    #[test]
    fn single_one_bit_distance_code_is_allowed() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 1];
        decoder
            .decompress_block(&dynamic_block_with_one_distance(1), &mut output)
            .unwrap();
        assert_eq!(&output, b"a");
    }

    #[test]
    fn incomplete_distance_code_is_illegal() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 1];
        let result = decoder
            .decompress_block(&dynamic_block_with_one_distance(2), &mut output);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn read_compressed_data() {
        let input: &[u8] = b"CK%\xcc\xd1\t\x031\x0c\x04\xd1V\xb6\x80#\x95\xa4\
              \t\xc5\x12\xc7\x82e\xfb,\xa9\xff\x18\xee{x\xf3\x9d\xdb\x1c\\Q\
              \x0e\x9d}n\x04\x13\xe2\x96\x17\xda\x1ca--kC\x94\x8b\xd18nX\xe7\
              \x89az\x00\x8c\x15>\x15i\xbe\x0e\xe6hTj\x8dD%\xba\xfc\xce\x1e\
              \x96\xef\xda\xe0r\x0f\x81t>%\x9f?\x12]-\x87";
        let expected: &[u8] =
            b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed \
              do eiusmod tempor incididunt ut labore et dolore magna aliqua.";
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = vec![0u8; expected.len()];
        decoder.decompress_block(input, &mut output).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn text_across_blocks() {
        let text = lipsum::lipsum(20_000);
        let blocks = compress(text.as_bytes());
        assert!(blocks.len() > 1);
        assert_eq!(decompress(&blocks), text.as_bytes());
    }

    #[test]
    fn repeating_data_references_previous_block() {
        let data: Vec<u8> =
            (0..WINDOW_SIZE * 3 + 1).map(|index| (index % 251) as u8).collect();
        let blocks = compress(&data);
        assert_eq!(blocks.len(), 4);
        assert_eq!(decompress(&blocks), data);
    }

    #[test]
    fn incompressible_data_uses_stored_blocks() {
        let mut data = vec![0u8; WINDOW_SIZE + 1000];
        SmallRng::seed_from_u64(7).fill_bytes(&mut data);
        let blocks = compress(&data);
        assert_eq!(blocks[0].1[2], 1);
        assert_eq!(decompress(&blocks), data);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 3];
        let result = decoder.decompress_block(b"XY\x01\x03\x00\xfc\xffabc", &mut output);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn rejects_oversized_output() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = vec![0u8; WINDOW_SIZE + 1];
        let result = decoder.decompress_block(b"CK\x03\x00", &mut output);
        assert!(matches!(result, Err(Error::DataFormat(_))));
    }

    #[test]
    fn rejects_reserved_block_type() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 1];
        let result = decoder.decompress_block(b"CK\x07\x00", &mut output);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn stored_block_length_check() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 3];
        decoder
            .decompress_block(b"CK\x01\x03\x00\xfc\xffabc", &mut output)
            .unwrap();
        assert_eq!(&output, b"abc");
        let result =
            decoder.decompress_block(b"CK\x01\x03\x00\xfd\xffabc", &mut output);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }

    #[test]
    fn short_output_is_illegal() {
        let mut decoder = MsZipDecoder::new().unwrap();
        let mut output = [0u8; 4];
        let result =
            decoder.decompress_block(b"CK\x01\x03\x00\xfc\xffabc", &mut output);
        assert!(matches!(result, Err(Error::IllegalData(_))));
    }
}
