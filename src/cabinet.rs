use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::consts;
use crate::error::{eof_as, Error, Result};
use crate::file::{parse_file_entry, FileEntries, FileEntry, FileReader};
use crate::folder::{parse_folder_entry, FolderData, FolderEntries, FolderReader};
use crate::string::read_null_terminated_string;

// Fixed part of a CFHEADER record.
const HEADER_SIZE: usize = 36;

/// The fixed header fields of a cabinet, as reported by [`probe`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CabinetInfo {
    /// Total size of the cabinet file in bytes, as recorded in its header.
    pub total_size: u32,
    /// Number of folders in this cabinet.
    pub folder_count: u16,
    /// Number of file entries in this cabinet.
    pub file_count: u16,
    /// Arbitrary number shared by every cabinet of a set.
    pub set_id: u16,
    /// Zero-based position of this cabinet within its set.
    pub set_index: u16,
    /// True if the cabinet carries application reserve areas.
    pub has_reserve: bool,
    /// True if a previous cabinet in the set is named.
    pub has_previous: bool,
    /// True if a next cabinet in the set is named.
    pub has_next: bool,
}

/// The name of a neighbouring cabinet in a set, and a human-readable name
/// for the disk it is on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeName {
    /// File name of the cabinet.
    pub cabinet: String,
    /// Label of the disk holding the cabinet.
    pub disk: String,
}

struct Header {
    info: CabinetInfo,
    first_file_offset: u32,
}

/// Everything parsed from a cabinet's header, folder and file records.
pub(crate) struct CabinetMetadata {
    pub(crate) info: CabinetInfo,
    pub(crate) reserve_data: Vec<u8>,
    pub(crate) data_reserve_size: u8,
    pub(crate) previous: Option<VolumeName>,
    pub(crate) next: Option<VolumeName>,
    pub(crate) folders: Vec<FolderData>,
    pub(crate) files: Vec<FileEntry>,
}

/// Reads just the fixed header of a cabinet and reports what it says,
/// without reading any folder or file records.
///
/// Fails with [`Error::NotACabinet`] if the data does not start with a
/// cabinet header at all.
pub fn probe<R: Read>(mut reader: R) -> Result<CabinetInfo> {
    Ok(read_header(&mut reader)?.info)
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    let mut fixed = [0u8; HEADER_SIZE];
    reader.read_exact(&mut fixed).map_err(|error| {
        eof_as(error, || {
            Error::NotACabinet("file is too short for a header".to_string())
        })
    })?;
    let mut fields = &fixed[..];
    let signature = fields.read_u32::<LittleEndian>()?;
    if signature != consts::FILE_SIGNATURE {
        return Err(Error::NotACabinet("invalid file signature".to_string()));
    }
    let _reserved1 = fields.read_u32::<LittleEndian>()?;
    let total_size = fields.read_u32::<LittleEndian>()?;
    let _reserved2 = fields.read_u32::<LittleEndian>()?;
    let first_file_offset = fields.read_u32::<LittleEndian>()?;
    let _reserved3 = fields.read_u32::<LittleEndian>()?;
    let minor_version = fields.read_u8()?;
    let major_version = fields.read_u8()?;
    if major_version > consts::VERSION_MAJOR
        || major_version == consts::VERSION_MAJOR
            && minor_version > consts::VERSION_MINOR
    {
        return Err(Error::UnknownCabinetVersion {
            major: major_version,
            minor: minor_version,
        });
    }
    let folder_count = fields.read_u16::<LittleEndian>()?;
    let file_count = fields.read_u16::<LittleEndian>()?;
    if folder_count == 0 || file_count == 0 {
        corrupt_cabinet!(
            "Cabinet has {} folders and {} files",
            folder_count,
            file_count
        );
    }
    let flags = fields.read_u16::<LittleEndian>()?;
    let set_id = fields.read_u16::<LittleEndian>()?;
    let set_index = fields.read_u16::<LittleEndian>()?;
    Ok(Header {
        info: CabinetInfo {
            total_size,
            folder_count,
            file_count,
            set_id,
            set_index,
            has_reserve: (flags & consts::FLAG_RESERVE_PRESENT) != 0,
            has_previous: (flags & consts::FLAG_PREV_CABINET) != 0,
            has_next: (flags & consts::FLAG_NEXT_CABINET) != 0,
        },
        first_file_offset,
    })
}

fn read_volume_name<R: Read + Seek>(reader: &mut R) -> Result<VolumeName> {
    let limit = consts::MAX_STRING_SIZE as u64;
    let cabinet = read_null_terminated_string(reader, false, limit)?;
    let disk = read_null_terminated_string(reader, false, limit)?;
    Ok(VolumeName { cabinet, disk })
}

impl CabinetMetadata {
    /// Parses a whole cabinet header.  Offsets in the header are relative to
    /// the start of `reader`, which must be positioned there.
    pub(crate) fn read<R: Read + Seek>(reader: &mut R) -> Result<CabinetMetadata> {
        let Header { info, first_file_offset } = read_header(reader)?;
        let truncated =
            || Error::CorruptCabinet("Cabinet header is truncated".to_string());

        let mut header_reserve_size = 0u16;
        let mut folder_reserve_size = 0u8;
        let mut data_reserve_size = 0u8;
        if info.has_reserve {
            let mut sizes = [0u8; 4];
            reader.read_exact(&mut sizes).map_err(|e| eof_as(e, truncated))?;
            let mut sizes = &sizes[..];
            header_reserve_size = sizes.read_u16::<LittleEndian>()?;
            folder_reserve_size = sizes.read_u8()?;
            data_reserve_size = sizes.read_u8()?;
        }
        if header_reserve_size as usize > consts::MAX_HEADER_RESERVE_SIZE {
            corrupt_cabinet!(
                "Header reserve size of {} bytes is too large (max is {})",
                header_reserve_size,
                consts::MAX_HEADER_RESERVE_SIZE
            );
        }
        let mut reserve_data = vec![0u8; header_reserve_size as usize];
        reader.read_exact(&mut reserve_data).map_err(|e| eof_as(e, truncated))?;

        let previous = if info.has_previous {
            Some(read_volume_name(reader)?)
        } else {
            None
        };
        let next =
            if info.has_next { Some(read_volume_name(reader)?) } else { None };

        let num_folders = info.folder_count as usize;
        let mut folders = Vec::with_capacity(num_folders);
        for _ in 0..num_folders {
            folders.push(parse_folder_entry(reader, folder_reserve_size as usize)?);
        }

        reader.seek(SeekFrom::Start(first_file_offset as u64))?;
        let mut files = Vec::with_capacity(info.file_count as usize);
        for _ in 0..info.file_count {
            let entry = parse_file_entry(reader)?;
            let special = entry.is_continued_from_previous()
                || entry.is_continued_to_next();
            if !special && entry.folder_index() as usize >= num_folders {
                corrupt_cabinet!(
                    "File entry {:?} refers to folder {} of {}",
                    entry.name(),
                    entry.folder_index(),
                    num_folders
                );
            }
            files.push(entry);
        }

        debug!(
            set_id = info.set_id,
            set_index = info.set_index,
            folders = num_folders,
            files = files.len(),
            "parsed cabinet metadata"
        );
        Ok(CabinetMetadata {
            info,
            reserve_data,
            data_reserve_size,
            previous,
            next,
            folders,
            files,
        })
    }
}

/// A structure for reading a cabinet file.
pub struct Cabinet<R> {
    metadata: CabinetMetadata,
    reader: R,
}

impl<R: Read + Seek> Cabinet<R> {
    /// Open an existing cabinet file.
    pub fn new(mut reader: R) -> Result<Cabinet<R>> {
        let metadata = CabinetMetadata::read(&mut reader)?;
        Ok(Cabinet { metadata, reader })
    }

    /// Returns the fixed header fields of this cabinet.
    pub fn info(&self) -> &CabinetInfo {
        &self.metadata.info
    }

    /// Returns the cabinet set ID for this cabinet (an arbitrary number used
    /// to group together a set of cabinets).
    pub fn cabinet_set_id(&self) -> u16 {
        self.metadata.info.set_id
    }

    /// Returns this cabinet's (zero-based) index within its cabinet set.
    pub fn cabinet_set_index(&self) -> u16 {
        self.metadata.info.set_index
    }

    /// Returns the application-defined reserve data stored in the cabinet
    /// header.
    pub fn reserve_data(&self) -> &[u8] {
        &self.metadata.reserve_data
    }

    /// Returns the previous cabinet in the set, if this one names it.
    pub fn previous_cabinet(&self) -> Option<&VolumeName> {
        self.metadata.previous.as_ref()
    }

    /// Returns the next cabinet in the set, if this one names it.
    pub fn next_cabinet(&self) -> Option<&VolumeName> {
        self.metadata.next.as_ref()
    }

    /// Returns an iterator over the folder entries in this cabinet.
    pub fn folder_entries(&self) -> FolderEntries {
        FolderEntries {
            iter: self.metadata.folders.iter().enumerate(),
            files: &self.metadata.files,
            num_folders: self.metadata.folders.len(),
        }
    }

    /// Returns an iterator over all file entries in this cabinet, in the
    /// order they are recorded.
    pub fn file_entries(&self) -> FileEntries {
        FileEntries { iter: self.metadata.files.iter(), folder: None }
    }

    /// Returns the entry for the file with the given name, if any.
    pub fn get_file_entry(&self, name: &str) -> Option<&FileEntry> {
        self.metadata.files.iter().find(|&file| file.name() == name)
    }

    /// Returns a reader over the decompressed data for the file in the cabinet
    /// with the given name.
    ///
    /// Files whose data starts in the previous cabinet of a set cannot be
    /// read this way; use [`Extractor`](crate::Extractor) to walk the set.
    pub fn read_file(&mut self, name: &str) -> Result<FileReader<R>> {
        let file_entry = match self.get_file_entry(name) {
            Some(file_entry) => file_entry,
            None => not_found!("No such file in cabinet: {:?}", name),
        };
        if file_entry.is_continued_from_previous() {
            corrupt_cabinet!(
                "File {:?} starts in the previous cabinet",
                name
            );
        }
        let folder_index =
            file_entry.resolve_folder(self.metadata.folders.len());
        let file_start_in_folder = file_entry.uncompressed_offset() as u64;
        let size = file_entry.uncompressed_size() as u64;
        let mut reader = self.read_folder(folder_index)?;
        reader.seek(SeekFrom::Start(file_start_in_folder))?;
        Ok(FileReader { reader, file_start_in_folder, offset: 0, size })
    }

    /// Returns a reader over the decompressed data in the specified folder.
    fn read_folder(&mut self, index: usize) -> Result<FolderReader<R>> {
        let folder = match self.metadata.folders.get(index) {
            Some(folder) => folder,
            None => corrupt_cabinet!(
                "Folder index {} is out of range (cabinet has {} folders)",
                index,
                self.metadata.folders.len()
            ),
        };
        FolderReader::new(
            &mut self.reader,
            folder,
            self.metadata.data_reserve_size,
        )
    }
}
