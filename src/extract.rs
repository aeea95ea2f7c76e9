use std::io::Write;
use std::path::Path;

use tracing::{debug, info, trace};

use crate::block::{read_block_part, OutputStage};
use crate::cabinet::CabinetMetadata;
use crate::consts;
use crate::continuation::{Volume, VolumeChain};
use crate::ctype::CompressionType;
use crate::decompressor::Decompressor;
use crate::error::{Error, Result};
use crate::file::FileEntry;
use crate::notify::{Handler, Notification, Reply};

/// Walks every file record of a cabinet, asking a [`Handler`] what to do
/// with each one and following split folders into later cabinets of the
/// set.
///
/// ```no_run
/// use std::fs::File;
/// use std::io;
/// use std::path::Path;
///
/// use cabfdi::{Extractor, Handler, Notification, Reply};
///
/// struct ToDisk;
///
/// impl Handler for ToDisk {
///     type Volume = File;
///     type Output = File;
///
///     fn open_volume(&mut self, path: &Path) -> io::Result<File> {
///         File::open(path)
///     }
///
///     fn notify(&mut self, notification: Notification<'_, File>) -> Reply<File> {
///         match notification {
///             Notification::CopyFile { file } => match File::create(file.name()) {
///                 Ok(output) => Reply::Extract(output),
///                 Err(_) => Reply::Abort,
///             },
///             _ => Reply::Continue,
///         }
///     }
/// }
///
/// let mut extractor = Extractor::new(ToDisk);
/// extractor.extract("disk1.cab").unwrap();
/// ```
pub struct Extractor<H> {
    handler: H,
}

/// Decoding position within the folder most recently read from.
struct FolderCursor {
    folder: Option<(usize, CompressionType)>,
    decompressor: Option<Decompressor>,
    offset: u64,
    /// Data blocks of the folder still unread in the current cabinet.
    blocks_left: u16,
    input: Vec<u8>,
    stage: OutputStage,
}

impl<H: Handler> Extractor<H> {
    /// Creates an extractor that reports to `handler`.
    pub fn new(handler: H) -> Extractor<H> {
        Extractor { handler }
    }

    /// Returns a reference to the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns a mutable reference to the handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Consumes the extractor, returning the handler.
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Walks the cabinet at `path`.  Files that start in an earlier cabinet
    /// are reported with [`Notification::PartialFile`] and skipped; files
    /// that run into later cabinets are followed through
    /// [`Notification::NextCabinet`].
    pub fn extract<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut reader = self.handler.open_volume(path)?;
        let metadata = CabinetMetadata::read(&mut reader)?;
        info!(
            path = %path.display(),
            folders = metadata.folders.len(),
            files = metadata.files.len(),
            "walking cabinet"
        );
        let mut chain = VolumeChain::new(Volume {
            path: path.to_path_buf(),
            metadata,
            reader,
        });
        {
            let first = chain.first();
            self.ask(Notification::CabinetInfo {
                path: &first.path,
                info: &first.metadata.info,
                next: first.metadata.next.as_ref(),
            })?;
        }

        let files = chain.first().metadata.files.clone();
        let num_folders = chain.first().metadata.folders.len();
        self.ask(Notification::Enumerate { files_remaining: files.len() })?;

        let mut cursor = FolderCursor::new();
        for file in &files {
            if file.is_continued_from_previous() {
                debug!(name = file.name(), "file starts in previous cabinet");
                let previous = chain.first().metadata.previous.as_ref();
                self.ask(Notification::PartialFile { file, previous })?;
                continue;
            }
            let mut output = match self.ask(Notification::CopyFile { file })? {
                Reply::Extract(output) => output,
                _ => {
                    trace!(name = file.name(), "skipping file");
                    continue;
                }
            };
            let folder_index = file.resolve_folder(num_folders);
            cursor.seek(&mut chain, &mut self.handler, file, folder_index)?;
            cursor.copy(&mut chain, &mut self.handler, file, &mut output)?;
            debug!(
                name = file.name(),
                size = file.uncompressed_size(),
                "extracted file"
            );
            self.ask(Notification::CloseFile {
                file,
                output,
                execute: file.is_exec(),
            })?;
        }

        self.ask(Notification::Enumerate { files_remaining: 0 })?;
        Ok(())
    }

    fn ask(
        &mut self,
        notification: Notification<'_, H::Output>,
    ) -> Result<Reply<H::Output>> {
        match self.handler.notify(notification) {
            Reply::Abort => {
                info!("extraction aborted by handler");
                Err(Error::UserAbort)
            }
            reply => Ok(reply),
        }
    }
}

impl FolderCursor {
    fn new() -> FolderCursor {
        FolderCursor {
            folder: None,
            decompressor: None,
            offset: 0,
            blocks_left: 0,
            input: Vec::with_capacity(consts::MAX_INPUT_SIZE),
            stage: OutputStage::new(),
        }
    }

    /// Positions the cursor at the start of `file`'s data, restarting the
    /// folder when the file lies in another folder or behind the cursor,
    /// and decoding and discarding whatever lies in between.
    fn seek<H: Handler>(
        &mut self,
        chain: &mut VolumeChain<H::Volume>,
        handler: &mut H,
        file: &FileEntry,
        folder_index: usize,
    ) -> Result<()> {
        let (ctype, num_blocks) =
            match chain.first().metadata.folders.get(folder_index) {
                Some(folder) => {
                    (folder.compression_type, folder.num_data_blocks)
                }
                None => corrupt_cabinet!(
                    "File {:?} is in folder {}, which does not exist",
                    file.name(),
                    folder_index
                ),
            };
        let target = file.uncompressed_offset() as u64;
        if self.folder != Some((folder_index, ctype)) || target < self.offset {
            debug!(folder = folder_index, ?ctype, "starting folder");
            match self.decompressor {
                Some(ref mut decompressor) => decompressor.reconfigure(ctype)?,
                None => self.decompressor = Some(Decompressor::for_type(ctype)?),
            }
            chain.seek_to_folder(folder_index)?;
            self.folder = Some((folder_index, ctype));
            self.offset = 0;
            self.blocks_left = num_blocks;
            self.stage.clear();
        }
        if target > self.offset {
            trace!(bytes = target - self.offset, "skipping folder data");
        }
        while self.offset < target {
            if self.stage.is_empty() {
                self.next_block(chain, handler, file)?;
            }
            let wanted = (target - self.offset).min(usize::MAX as u64) as usize;
            let skipped = self.stage.take(wanted).len();
            self.offset += skipped as u64;
        }
        Ok(())
    }

    /// Writes `file`'s data to `output`; the cursor must be at its start.
    fn copy<H: Handler>(
        &mut self,
        chain: &mut VolumeChain<H::Volume>,
        handler: &mut H,
        file: &FileEntry,
        output: &mut H::Output,
    ) -> Result<()> {
        let mut remaining = file.uncompressed_size() as u64;
        while remaining > 0 {
            if self.stage.is_empty() {
                self.next_block(chain, handler, file)?;
            }
            let wanted = remaining.min(usize::MAX as u64) as usize;
            let chunk = self.stage.take(wanted);
            output.write_all(chunk)?;
            remaining -= chunk.len() as u64;
            self.offset += chunk.len() as u64;
        }
        Ok(())
    }

    /// Reads and decodes the next data block of the folder, splicing a
    /// split block together from as many cabinets as it spans.
    fn next_block<H: Handler>(
        &mut self,
        chain: &mut VolumeChain<H::Volume>,
        handler: &mut H,
        file: &FileEntry,
    ) -> Result<()> {
        self.input.clear();
        let header = loop {
            if self.blocks_left == 0 {
                return Err(Error::InputError(format!(
                    "unexpected end of folder while reading {:?}",
                    file.name()
                )));
            }
            self.blocks_left -= 1;
            let volume = chain.current_mut();
            let header = read_block_part(
                &mut volume.reader,
                volume.metadata.data_reserve_size,
                &mut self.input,
            )?;
            if !header.is_split() {
                break header;
            }
            debug!(name = file.name(), "data block continues in next cabinet");
            chain.continue_folder(handler, file.name())?;
            // The split block is counted again by the folder it resumes in.
            self.blocks_left = chain
                .current_mut()
                .metadata
                .folders
                .first()
                .map_or(0, |folder| folder.num_data_blocks);
        };
        let decompressor = match self.decompressor {
            Some(ref mut decompressor) => decompressor,
            None => {
                return Err(Error::InputError(
                    "no folder has been started".to_string(),
                ))
            }
        };
        self.stage.fill(
            decompressor,
            &self.input,
            header.uncompressed_size as usize,
        )
    }
}
