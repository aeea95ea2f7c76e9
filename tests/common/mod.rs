#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use cabfdi::{checksum, Handler, Notification, Reply, VolumeError};
use flate2::write::DeflateEncoder;
use flate2::Compression;

pub const CTYPE_NONE: u16 = 0;
pub const CTYPE_MSZIP: u16 = 1;
pub const CTYPE_QUANTUM: u16 = 2;

pub const ATTR_EXEC: u16 = 0x40;

/// One CFDATA record; an uncompressed size of zero marks the first part of
/// a block that continues in the next cabinet.
#[derive(Clone)]
pub struct Block {
    pub payload: Vec<u8>,
    pub uncompressed_size: u16,
}

#[derive(Clone)]
pub struct Folder {
    pub ctype: u16,
    pub blocks: Vec<Block>,
}

#[derive(Clone)]
pub struct File {
    pub name: String,
    pub folder_index: u16,
    pub offset: u32,
    pub size: u32,
    pub attributes: u16,
}

/// Describes a cabinet to be assembled byte by byte.
#[derive(Clone, Default)]
pub struct CabLayout {
    pub set_id: u16,
    pub set_index: u16,
    pub previous: Option<(String, String)>,
    pub next: Option<(String, String)>,
    pub data_reserve: u8,
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
}

impl File {
    pub fn new(name: &str, folder_index: u16, offset: u32, size: u32) -> File {
        File { name: name.to_string(), folder_index, offset, size, attributes: 0 }
    }
}

impl CabLayout {
    pub fn assemble(&self) -> Vec<u8> {
        let has_reserve = self.data_reserve != 0;
        let mut flags = 0u16;
        if self.previous.is_some() {
            flags |= 0x1;
        }
        if self.next.is_some() {
            flags |= 0x2;
        }
        if has_reserve {
            flags |= 0x4;
        }

        let mut names = Vec::new();
        for (cabinet, disk) in self.previous.iter().chain(self.next.iter()) {
            names.extend_from_slice(cabinet.as_bytes());
            names.push(0);
            names.extend_from_slice(disk.as_bytes());
            names.push(0);
        }
        let header_size = 36 + if has_reserve { 4 } else { 0 } + names.len();
        let folders_size = 8 * self.folders.len();

        let mut file_records = Vec::new();
        for file in &self.files {
            file_records.extend_from_slice(&file.size.to_le_bytes());
            file_records.extend_from_slice(&file.offset.to_le_bytes());
            file_records.extend_from_slice(&file.folder_index.to_le_bytes());
            file_records.extend_from_slice(&0x226cu16.to_le_bytes());
            file_records.extend_from_slice(&0x59bau16.to_le_bytes());
            file_records.extend_from_slice(&file.attributes.to_le_bytes());
            file_records.extend_from_slice(file.name.as_bytes());
            file_records.push(0);
        }
        let first_file_offset = header_size + folders_size;

        let mut data = Vec::new();
        let mut folder_records = Vec::new();
        let data_start = first_file_offset + file_records.len();
        for folder in &self.folders {
            let offset = (data_start + data.len()) as u32;
            folder_records.extend_from_slice(&offset.to_le_bytes());
            folder_records
                .extend_from_slice(&(folder.blocks.len() as u16).to_le_bytes());
            folder_records.extend_from_slice(&folder.ctype.to_le_bytes());
            for block in &folder.blocks {
                let compressed = block.payload.len() as u16;
                let mut sizes = [0u8; 4];
                sizes[..2].copy_from_slice(&compressed.to_le_bytes());
                sizes[2..].copy_from_slice(&block.uncompressed_size.to_le_bytes());
                let sum = checksum(&sizes, checksum(&block.payload, 0));
                data.extend_from_slice(&sum.to_le_bytes());
                data.extend_from_slice(&sizes);
                data.extend(std::iter::repeat(0xee).take(self.data_reserve as usize));
                data.extend_from_slice(&block.payload);
            }
        }

        let total_size = (data_start + data.len()) as u32;
        let mut out = Vec::with_capacity(total_size as usize);
        out.extend_from_slice(b"MSCF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&total_size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(first_file_offset as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&[3, 1]);
        out.extend_from_slice(&(self.folders.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.files.len() as u16).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&self.set_id.to_le_bytes());
        out.extend_from_slice(&self.set_index.to_le_bytes());
        if has_reserve {
            out.extend_from_slice(&0u16.to_le_bytes());
            out.push(0);
            out.push(self.data_reserve);
        }
        out.extend_from_slice(&names);
        out.extend_from_slice(&folder_records);
        out.extend_from_slice(&file_records);
        out.extend_from_slice(&data);
        assert_eq!(out.len(), total_size as usize);
        out
    }
}

/// Splits `data` into stored blocks of at most 32 KiB.
pub fn stored_blocks(data: &[u8]) -> Vec<Block> {
    data.chunks(0x8000)
        .map(|chunk| Block {
            payload: chunk.to_vec(),
            uncompressed_size: chunk.len() as u16,
        })
        .collect()
}

/// Compresses `data` into MSZIP blocks of at most 32 KiB each.
pub fn mszip_blocks(data: &[u8]) -> Vec<Block> {
    data.chunks(0x8000)
        .map(|chunk| {
            let mut encoder =
                DeflateEncoder::new(b"CK".to_vec(), Compression::best());
            encoder.write_all(chunk).unwrap();
            Block {
                payload: encoder.finish().unwrap(),
                uncompressed_size: chunk.len() as u16,
            }
        })
        .collect()
}

pub fn lorem(words: usize) -> Vec<u8> {
    lipsum::lipsum(words).into_bytes()
}

/// What a [`MemoryHandler`] was told, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    CabinetInfo { path: PathBuf, set_index: u16 },
    PartialFile(String),
    CopyFile(String),
    CloseFile { name: String, execute: bool },
    NextCabinet { cabinet: String, error: VolumeError },
    Enumerate(usize),
}

/// Serves cabinets from memory and collects extracted files.
#[derive(Default)]
pub struct MemoryHandler {
    pub volumes: HashMap<PathBuf, Vec<u8>>,
    pub events: Vec<Event>,
    pub extracted: Vec<(String, Vec<u8>)>,
    pub skip: Vec<String>,
    pub abort_on_copy: Option<String>,
    /// Directories to try, in turn, after a next cabinet was rejected.
    pub redirects: Vec<PathBuf>,
}

impl MemoryHandler {
    pub fn with_volume<P: AsRef<Path>>(mut self, path: P, bytes: Vec<u8>) -> Self {
        self.volumes.insert(path.as_ref().to_path_buf(), bytes);
        self
    }

    pub fn extracted(&self, name: &str) -> Option<&[u8]> {
        self.extracted
            .iter()
            .find(|(extracted, _)| extracted == name)
            .map(|(_, data)| data.as_slice())
    }
}

impl Handler for MemoryHandler {
    type Volume = Cursor<Vec<u8>>;
    type Output = Vec<u8>;

    fn open_volume(&mut self, path: &Path) -> io::Result<Cursor<Vec<u8>>> {
        match self.volumes.get(path) {
            Some(bytes) => Ok(Cursor::new(bytes.clone())),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no volume at {}", path.display()),
            )),
        }
    }

    fn notify(&mut self, notification: Notification<'_, Vec<u8>>) -> Reply<Vec<u8>> {
        match notification {
            Notification::CabinetInfo { path, info, .. } => {
                self.events.push(Event::CabinetInfo {
                    path: path.to_path_buf(),
                    set_index: info.set_index,
                });
                Reply::Continue
            }
            Notification::PartialFile { file, .. } => {
                self.events.push(Event::PartialFile(file.name().to_string()));
                Reply::Continue
            }
            Notification::CopyFile { file } => {
                let name = file.name().to_string();
                self.events.push(Event::CopyFile(name.clone()));
                if self.abort_on_copy.as_deref() == Some(name.as_str()) {
                    Reply::Abort
                } else if self.skip.contains(&name) {
                    Reply::Skip
                } else {
                    Reply::Extract(Vec::new())
                }
            }
            Notification::CloseFile { file, output, execute } => {
                let name = file.name().to_string();
                self.events.push(Event::CloseFile { name: name.clone(), execute });
                self.extracted.push((name, output));
                Reply::Continue
            }
            Notification::NextCabinet { next, path, error } => {
                self.events.push(Event::NextCabinet {
                    cabinet: next.cabinet.clone(),
                    error,
                });
                if error == VolumeError::None {
                    Reply::Continue
                } else if self.redirects.is_empty() {
                    Reply::Abort
                } else {
                    *path = self.redirects.remove(0);
                    Reply::Continue
                }
            }
            Notification::Enumerate { files_remaining } => {
                self.events.push(Event::Enumerate(files_remaining));
                Reply::Continue
            }
        }
    }
}
