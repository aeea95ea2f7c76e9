use std::io::{self, Read, Seek, SeekFrom};
use std::slice;

use byteorder::{LittleEndian, ReadBytesExt};
use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::datetime_from_bits;
use crate::error::{eof_as, Error, Result};
use crate::folder::FolderReader;
use crate::string::read_null_terminated_string;

// Fixed part of a CFFILE record.
const FILE_ENTRY_SIZE: u64 = 16;

/// An iterator over file entries, either of a whole cabinet or of one
/// folder.
#[derive(Clone)]
pub struct FileEntries<'a> {
    pub(crate) iter: slice::Iter<'a, FileEntry>,
    pub(crate) folder: Option<(usize, usize)>,
}

/// Metadata about one file stored in a cabinet.
#[derive(Debug, Clone)]
pub struct FileEntry {
    name: String,
    datetime: Option<PrimitiveDateTime>,
    uncompressed_size: u32,
    uncompressed_offset: u32,
    folder_index: u16,
    attributes: u16,
}

/// A reader for reading decompressed data from a cabinet file.
pub struct FileReader<'a, R> {
    pub(crate) reader: FolderReader<'a, R>,
    pub(crate) file_start_in_folder: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl<'a> Iterator for FileEntries<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<&'a FileEntry> {
        match self.folder {
            None => self.iter.next(),
            Some((index, num_folders)) => self
                .iter
                .by_ref()
                .find(|file| file.resolve_folder(num_folders) == index),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.folder {
            None => self.iter.size_hint(),
            Some(_) => (0, Some(self.iter.len())),
        }
    }
}

impl FileEntry {
    /// Returns the name of file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the datetime for this file.  According to the CAB format documentation, this
    /// "is typically considered the 'last modified' time in local time, but
    /// the actual definition is application-defined."
    ///
    /// Note that this will return [`None`] if the datetime in the cabinet file
    /// was not a valid date/time.
    pub fn datetime(&self) -> Option<PrimitiveDateTime> {
        self.datetime
    }

    /// Returns the total size of the file when decompressed, in bytes.
    pub fn uncompressed_size(&self) -> u32 {
        self.uncompressed_size
    }

    /// Returns the offset of the file's data within its folder's
    /// decompressed stream.
    pub fn uncompressed_offset(&self) -> u32 {
        self.uncompressed_offset
    }

    /// Returns the raw folder index field, including the special values
    /// 0xFFFD, 0xFFFE and 0xFFFF that mark files spanning cabinets.
    pub fn folder_index(&self) -> u16 {
        self.folder_index
    }

    /// Returns true if this file's data starts in the previous cabinet of the
    /// set.
    pub fn is_continued_from_previous(&self) -> bool {
        self.folder_index & consts::IFOLD_CONTINUED_FROM_PREV
            == consts::IFOLD_CONTINUED_FROM_PREV
    }

    /// Returns true if this file's data runs on into the next cabinet of the
    /// set.
    pub fn is_continued_to_next(&self) -> bool {
        self.folder_index & consts::IFOLD_CONTINUED_TO_NEXT
            == consts::IFOLD_CONTINUED_TO_NEXT
    }

    /// The folder holding this file's data, for a cabinet with
    /// `num_folders` folders.
    pub(crate) fn resolve_folder(&self, num_folders: usize) -> usize {
        if self.is_continued_from_previous() {
            0
        } else if self.is_continued_to_next() {
            num_folders.saturating_sub(1)
        } else {
            self.folder_index as usize
        }
    }

    /// Returns true if this file has the "read-only" attribute set.
    pub fn is_read_only(&self) -> bool {
        (self.attributes & consts::ATTR_READ_ONLY) != 0
    }

    /// Returns true if this file has the "hidden" attribute set.
    pub fn is_hidden(&self) -> bool {
        (self.attributes & consts::ATTR_HIDDEN) != 0
    }

    /// Returns true if this file has the "system file" attribute set.
    pub fn is_system(&self) -> bool {
        (self.attributes & consts::ATTR_SYSTEM) != 0
    }

    /// Returns true if this file has the "archive" (modified since last
    /// backup) attribute set.
    pub fn is_archive(&self) -> bool {
        (self.attributes & consts::ATTR_ARCH) != 0
    }

    /// Returns true if this file has the "execute after extraction" attribute
    /// set.
    pub fn is_exec(&self) -> bool {
        (self.attributes & consts::ATTR_EXEC) != 0
    }

    /// Returns true if this file has the "name is UTF" attribute set.
    pub fn is_name_utf(&self) -> bool {
        (self.attributes & consts::ATTR_NAME_IS_UTF) != 0
    }
}

impl<'a, R: Read + Seek> Read for FileReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        debug_assert!(self.offset <= self.size);
        let bytes_remaining = self.size - self.offset;
        let max_bytes = bytes_remaining.min(buf.len() as u64) as usize;
        if max_bytes == 0 {
            return Ok(0);
        }
        let bytes_read = self.reader.read(&mut buf[..max_bytes])?;
        if bytes_read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "folder data ends before the end of the file",
            ));
        }
        self.offset += bytes_read as u64;
        Ok(bytes_read)
    }
}

impl<'a, R: Read + Seek> Seek for FileReader<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };
        if new_offset < 0 || (new_offset as u64) > self.size {
            invalid_input!(
                "Cannot seek to {}, file length is {}",
                new_offset,
                self.size
            );
        }
        let new_offset = new_offset as u64;
        self.reader
            .seek(SeekFrom::Start(self.file_start_in_folder + new_offset))?;
        self.offset = new_offset;
        Ok(new_offset)
    }
}

pub(crate) fn parse_file_entry<R: Read + Seek>(
    reader: &mut R,
) -> Result<FileEntry> {
    let truncated =
        || Error::CorruptCabinet("File entry is truncated".to_string());
    let mut fixed = [0u8; FILE_ENTRY_SIZE as usize];
    reader.read_exact(&mut fixed).map_err(|e| eof_as(e, truncated))?;
    let mut fields = &fixed[..];
    let uncompressed_size = fields.read_u32::<LittleEndian>()?;
    let uncompressed_offset = fields.read_u32::<LittleEndian>()?;
    let folder_index = fields.read_u16::<LittleEndian>()?;
    let date = fields.read_u16::<LittleEndian>()?;
    let time = fields.read_u16::<LittleEndian>()?;
    let attributes = fields.read_u16::<LittleEndian>()?;
    let is_utf8 = (attributes & consts::ATTR_NAME_IS_UTF) != 0;
    let name = read_null_terminated_string(
        reader,
        is_utf8,
        consts::MAX_STRING_SIZE as u64,
    )?;
    Ok(FileEntry {
        name,
        datetime: datetime_from_bits(date, time),
        uncompressed_size,
        uncompressed_offset,
        folder_index,
        attributes,
    })
}
