use std::io::{self, Read, Seek, SeekFrom};
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::block::{read_block_header, read_block_part};
use crate::consts;
use crate::ctype::CompressionType;
use crate::decompressor::Decompressor;
use crate::error::{eof_as, Error, Result};
use crate::file::{FileEntries, FileEntry};

// Fixed part of a CFFOLDER record.
const FOLDER_ENTRY_SIZE: usize = 8;

/// An iterator over the folder entries in a cabinet.
#[derive(Clone)]
pub struct FolderEntries<'a> {
    pub(crate) iter: std::iter::Enumerate<slice::Iter<'a, FolderData>>,
    pub(crate) files: &'a [FileEntry],
    pub(crate) num_folders: usize,
}

/// Metadata about one folder in a cabinet.
pub struct FolderEntry<'a> {
    entry: &'a FolderData,
    index: usize,
    files: &'a [FileEntry],
    num_folders: usize,
}

/// A parsed CFFOLDER record.
#[derive(Clone, Debug)]
pub(crate) struct FolderData {
    pub(crate) first_data_block_offset: u32,
    pub(crate) num_data_blocks: u16,
    pub(crate) compression_type: CompressionType,
    pub(crate) reserve_data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct DataBlockEntry {
    header_offset: u64,
    uncompressed_size: u16,
    cumulative_size: u64,
}

/// A reader for reading decompressed data from a cabinet folder.
///
/// Only folders contained entirely within one cabinet can be read this way;
/// a block that continues into the next cabinet is reported as corrupt.
pub(crate) struct FolderReader<'a, R> {
    reader: &'a mut R,
    compression_type: CompressionType,
    decompressor: Decompressor,
    data_reserve_size: u8,
    total_size: u64,
    data_blocks: Vec<DataBlockEntry>,
    input: Vec<u8>,
    current_block_index: usize,
    current_block_data: Vec<u8>,
    current_offset_within_block: usize,
    current_offset_within_folder: u64,
}

impl<'a> Iterator for FolderEntries<'a> {
    type Item = FolderEntry<'a>;

    fn next(&mut self) -> Option<FolderEntry<'a>> {
        let (index, entry) = self.iter.next()?;
        Some(FolderEntry {
            entry,
            index,
            files: self.files,
            num_folders: self.num_folders,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<'a> ExactSizeIterator for FolderEntries<'a> {}

impl<'a> FolderEntry<'a> {
    /// Returns the scheme used to compress this folder's data.
    pub fn compression_type(&self) -> CompressionType {
        self.entry.compression_type
    }

    /// Returns the number of data blocks used to store this folder's data.
    pub fn num_data_blocks(&self) -> u16 {
        self.entry.num_data_blocks
    }

    /// Returns the application-defined reserve data for this folder.
    pub fn reserve_data(&self) -> &[u8] {
        &self.entry.reserve_data
    }

    /// Returns an iterator over the file entries in this folder, including
    /// files continued from the previous cabinet (which live in the first
    /// folder) and files continued into the next one (the last folder).
    pub fn file_entries(&self) -> FileEntries<'a> {
        FileEntries {
            iter: self.files.iter(),
            folder: Some((self.index, self.num_folders)),
        }
    }
}

impl<'a, R: Read + Seek> FolderReader<'a, R> {
    pub(crate) fn new(
        reader: &'a mut R,
        entry: &FolderData,
        data_reserve_size: u8,
    ) -> Result<FolderReader<'a, R>> {
        let num_data_blocks = entry.num_data_blocks as usize;
        let mut data_blocks = Vec::with_capacity(num_data_blocks);
        let mut total_size: u64 = 0;

        reader.seek(SeekFrom::Start(entry.first_data_block_offset as u64))?;
        for index in 0..num_data_blocks {
            let header_offset = reader.stream_position()?;
            let header = read_block_header(reader, data_reserve_size)?;
            if header.is_split() {
                corrupt_cabinet!(
                    "Data block {} continues in the next cabinet",
                    index
                );
            }
            reader.seek(SeekFrom::Current(header.compressed_size as i64))?;
            total_size += header.uncompressed_size as u64;
            data_blocks.push(DataBlockEntry {
                header_offset,
                uncompressed_size: header.uncompressed_size,
                cumulative_size: total_size,
            });
        }
        debug!(
            blocks = num_data_blocks,
            total_size, "indexed folder data blocks"
        );

        let mut folder_reader = FolderReader {
            reader,
            compression_type: entry.compression_type,
            decompressor: Decompressor::for_type(entry.compression_type)?,
            data_reserve_size,
            total_size,
            data_blocks,
            input: Vec::with_capacity(consts::MAX_INPUT_SIZE),
            current_block_index: 0,
            current_block_data: Vec::new(),
            current_offset_within_block: 0,
            current_offset_within_folder: 0,
        };
        folder_reader.load_block()?;
        Ok(folder_reader)
    }

    fn current_block_start(&self) -> u64 {
        if self.current_block_index == 0 {
            0
        } else {
            self.data_blocks[self.current_block_index - 1].cumulative_size
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.current_offset_within_block = 0;
        self.current_offset_within_folder = 0;
        if self.current_block_index != 0 {
            self.decompressor.reconfigure(self.compression_type)?;
            self.current_block_index = 0;
            self.load_block()?;
        }
        Ok(())
    }

    fn load_block(&mut self) -> Result<()> {
        if self.current_block_index >= self.data_blocks.len() {
            self.current_block_data = Vec::new();
            return Ok(());
        }
        let block = &self.data_blocks[self.current_block_index];
        let uncompressed_size = block.uncompressed_size as usize;
        if uncompressed_size > consts::MAX_BLOCK_SIZE {
            data_format!(
                "Data block {} expands to {} bytes",
                self.current_block_index,
                uncompressed_size
            );
        }
        self.reader.seek(SeekFrom::Start(block.header_offset))?;
        self.input.clear();
        read_block_part(self.reader, self.data_reserve_size, &mut self.input)?;
        self.current_block_data.resize(uncompressed_size, 0);
        self.decompressor
            .decompress(&self.input, &mut self.current_block_data)?;
        Ok(())
    }

    fn seek_to(&mut self, new_offset: u64) -> Result<()> {
        if new_offset == self.total_size {
            self.current_block_index = self.data_blocks.len();
            self.current_block_data.clear();
            self.current_offset_within_block = 0;
            self.current_offset_within_folder = new_offset;
            return Ok(());
        }
        if self.compression_type == CompressionType::None {
            // Stored blocks carry no state, so jump straight to the target.
            let index = self
                .data_blocks
                .partition_point(|block| block.cumulative_size <= new_offset);
            if index != self.current_block_index {
                self.current_block_index = index;
                self.load_block()?;
            }
        } else if new_offset < self.current_block_start() {
            self.rewind()?;
        }
        while self.data_blocks[self.current_block_index].cumulative_size
            <= new_offset
        {
            self.current_block_index += 1;
            self.load_block()?;
        }
        self.current_offset_within_block =
            (new_offset - self.current_block_start()) as usize;
        self.current_offset_within_folder = new_offset;
        Ok(())
    }
}

impl<'a, R: Read + Seek> Read for FolderReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current_block_index < self.data_blocks.len()
            && self.current_offset_within_block
                == self.current_block_data.len()
        {
            self.current_block_index += 1;
            self.current_offset_within_block = 0;
            self.load_block()?;
        }
        if buf.is_empty() || self.current_block_index >= self.data_blocks.len()
        {
            return Ok(0);
        }
        let max_bytes = buf.len().min(
            self.current_block_data.len() - self.current_offset_within_block,
        );
        buf[..max_bytes].copy_from_slice(
            &self.current_block_data[self.current_offset_within_block..]
                [..max_bytes],
        );
        self.current_offset_within_block += max_bytes;
        self.current_offset_within_folder += max_bytes as u64;
        Ok(max_bytes)
    }
}

impl<'a, R: Read + Seek> Seek for FolderReader<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => {
                self.current_offset_within_folder as i64 + delta
            }
            SeekFrom::End(delta) => self.total_size as i64 + delta,
        };
        if new_offset < 0 || (new_offset as u64) > self.total_size {
            invalid_input!(
                "Cannot seek to {}, data length is {}",
                new_offset,
                self.total_size
            );
        }
        let new_offset = new_offset as u64;
        self.seek_to(new_offset)?;
        Ok(new_offset)
    }
}

pub(crate) fn parse_folder_entry<R: Read>(
    reader: &mut R,
    reserve_size: usize,
) -> Result<FolderData> {
    let truncated =
        || Error::CorruptCabinet("Folder entry is truncated".to_string());
    let mut fixed = [0u8; FOLDER_ENTRY_SIZE];
    reader.read_exact(&mut fixed).map_err(|e| eof_as(e, truncated))?;
    let mut fields = &fixed[..];
    let first_data_block_offset = fields.read_u32::<LittleEndian>()?;
    let num_data_blocks = fields.read_u16::<LittleEndian>()?;
    let compression_bits = fields.read_u16::<LittleEndian>()?;
    let compression_type = CompressionType::from_bitfield(compression_bits)?;
    let mut reserve_data = vec![0u8; reserve_size];
    reader.read_exact(&mut reserve_data).map_err(|e| eof_as(e, truncated))?;
    Ok(FolderData {
        first_data_block_offset,
        num_data_blocks,
        compression_type,
        reserve_data,
    })
}
