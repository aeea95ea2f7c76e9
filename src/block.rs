use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{trace, warn};

use crate::checksum::block_checksum;
use crate::consts;
use crate::decompressor::Decompressor;
use crate::error::{Error, Result};

/// The fixed part of a CFDATA record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct DataBlockHeader {
    pub(crate) checksum: u32,
    pub(crate) compressed_size: u16,
    pub(crate) uncompressed_size: u16,
}

impl DataBlockHeader {
    /// True for the first half of a block that is continued in the next
    /// cabinet of the set.
    pub(crate) fn is_split(&self) -> bool {
        self.uncompressed_size == 0
    }
}

/// Reads a data block header and skips its reserve area.
pub(crate) fn read_block_header<R: Read>(
    reader: &mut R,
    data_reserve_size: u8,
) -> Result<DataBlockHeader> {
    parse_block_header(reader, data_reserve_size)
        .map_err(|error| input_error(error, "data block header"))
}

fn parse_block_header<R: Read>(
    reader: &mut R,
    data_reserve_size: u8,
) -> io::Result<DataBlockHeader> {
    let checksum = reader.read_u32::<LittleEndian>()?;
    let compressed_size = reader.read_u16::<LittleEndian>()?;
    let uncompressed_size = reader.read_u16::<LittleEndian>()?;
    let reserve = data_reserve_size as u64;
    let skipped = io::copy(&mut reader.by_ref().take(reserve), &mut io::sink())?;
    if skipped != reserve {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(DataBlockHeader { checksum, compressed_size, uncompressed_size })
}

/// Reads one CFDATA record and appends its payload to `input`, which may
/// already hold the first part of a split block.  The stored checksum, if
/// any, is verified over this part alone before anything is decoded.
pub(crate) fn read_block_part<R: Read>(
    reader: &mut R,
    data_reserve_size: u8,
    input: &mut Vec<u8>,
) -> Result<DataBlockHeader> {
    let header = read_block_header(reader, data_reserve_size)?;
    let len = header.compressed_size as usize;
    if input.len() + len > consts::MAX_INPUT_SIZE {
        return Err(Error::InputError(format!(
            "data block of {} bytes overflows the {}-byte input buffer",
            input.len() + len,
            consts::MAX_INPUT_SIZE
        )));
    }
    let start = input.len();
    input.resize(start + len, 0);
    reader
        .read_exact(&mut input[start..])
        .map_err(|error| input_error(error, "data block payload"))?;

    if header.checksum != 0 {
        let actual = block_checksum(
            &input[start..],
            header.compressed_size,
            header.uncompressed_size,
        );
        if actual != header.checksum {
            warn!(
                expected = header.checksum,
                actual, "data block checksum mismatch"
            );
            return Err(Error::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
    }
    trace!(
        compressed = header.compressed_size,
        uncompressed = header.uncompressed_size,
        "read data block"
    );
    Ok(header)
}

fn input_error(error: io::Error, what: &str) -> Error {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        Error::InputError(format!("{} is truncated", what))
    } else {
        Error::Io(error)
    }
}

/// Decoded bytes of the current block that the caller has not consumed yet.
pub(crate) struct OutputStage {
    buffer: Vec<u8>,
    pos: usize,
    len: usize,
}

impl OutputStage {
    pub(crate) fn new() -> OutputStage {
        OutputStage {
            buffer: vec![0; consts::MAX_BLOCK_SIZE],
            pos: 0,
            len: 0,
        }
    }

    /// Decodes a complete (possibly spliced) block into the stage,
    /// replacing anything left in it.
    pub(crate) fn fill(
        &mut self,
        decompressor: &mut Decompressor,
        input: &[u8],
        uncompressed_size: usize,
    ) -> Result<()> {
        self.pos = 0;
        self.len = 0;
        if uncompressed_size > consts::MAX_BLOCK_SIZE {
            data_format!(
                "data block expands to {} bytes (max is {})",
                uncompressed_size,
                consts::MAX_BLOCK_SIZE
            );
        }
        decompressor.decompress(input, &mut self.buffer[..uncompressed_size])?;
        self.len = uncompressed_size;
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.len
    }

    pub(crate) fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Takes up to `max` staged bytes.
    pub(crate) fn take(&mut self, max: usize) -> &[u8] {
        let count = max.min(self.remaining());
        let start = self.pos;
        self.pos += count;
        &self.buffer[start..start + count]
    }

    pub(crate) fn clear(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}
