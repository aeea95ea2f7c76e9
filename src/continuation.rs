use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cabinet::{CabinetMetadata, VolumeName};
use crate::error::{Error, Result};
use crate::notify::{Handler, Notification, Reply, VolumeError};

/// One opened cabinet of a set.
pub(crate) struct Volume<V> {
    pub(crate) path: PathBuf,
    pub(crate) metadata: CabinetMetadata,
    pub(crate) reader: V,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ContinuationState {
    SeekingVolume,
    SeekingFolder,
    Resolved,
}

/// The cabinets opened so far while walking a set, and which of them data
/// blocks are currently read from.
pub(crate) struct VolumeChain<V> {
    volumes: Vec<Volume<V>>,
    current: usize,
}

impl<V: Read + Seek> VolumeChain<V> {
    pub(crate) fn new(first: Volume<V>) -> VolumeChain<V> {
        VolumeChain { volumes: vec![first], current: 0 }
    }

    /// The cabinet the walk started from.
    pub(crate) fn first(&self) -> &Volume<V> {
        &self.volumes[0]
    }

    /// The cabinet data blocks are read from.
    pub(crate) fn current_mut(&mut self) -> &mut Volume<V> {
        &mut self.volumes[self.current]
    }

    /// Positions the first cabinet at the start of one of its folders.
    pub(crate) fn seek_to_folder(&mut self, folder_index: usize) -> Result<()> {
        self.current = 0;
        let volume = &mut self.volumes[0];
        let offset = match volume.metadata.folders.get(folder_index) {
            Some(folder) => folder.first_data_block_offset,
            None => corrupt_cabinet!("No folder with index {}", folder_index),
        };
        volume.reader.seek(SeekFrom::Start(offset as u64))?;
        Ok(())
    }

    /// Follows a folder whose last block was split into the next cabinet
    /// holding `file_name`, opening more cabinets through `handler` as
    /// needed.  On success the current cabinet is positioned at the rest of
    /// the split block.
    pub(crate) fn continue_folder<H>(
        &mut self,
        handler: &mut H,
        file_name: &str,
    ) -> Result<()>
    where
        H: Handler<Volume = V>,
    {
        let mut state = ContinuationState::SeekingVolume;
        loop {
            state = match state {
                ContinuationState::SeekingVolume => {
                    if self.current + 1 == self.volumes.len() {
                        let volume = self.acquire_next(handler)?;
                        self.volumes.push(volume);
                    }
                    self.current += 1;
                    ContinuationState::SeekingFolder
                }
                ContinuationState::SeekingFolder => {
                    let volume = &mut self.volumes[self.current];
                    let continued = volume.metadata.files.iter().any(|file| {
                        file.is_continued_from_previous()
                            && file.name().eq_ignore_ascii_case(file_name)
                    });
                    if continued {
                        // The folder carries on in the first folder.
                        let offset = match volume.metadata.folders.first() {
                            Some(folder) => folder.first_data_block_offset,
                            None => corrupt_cabinet!("Cabinet has no folders"),
                        };
                        volume.reader.seek(SeekFrom::Start(offset as u64))?;
                        ContinuationState::Resolved
                    } else {
                        debug!(
                            path = %volume.path.display(),
                            file_name,
                            "continued file not in this cabinet"
                        );
                        ContinuationState::SeekingVolume
                    }
                }
                ContinuationState::Resolved => return Ok(()),
            };
        }
    }

    /// Asks the handler for the cabinet after the last one in the chain,
    /// retrying for as long as it keeps replying [`Reply::Continue`].
    fn acquire_next<H>(&self, handler: &mut H) -> Result<Volume<V>>
    where
        H: Handler<Volume = V>,
    {
        let last = &self.volumes[self.volumes.len() - 1];
        let next: VolumeName = match last.metadata.next {
            Some(ref next) => next.clone(),
            None => {
                return Err(Error::InputError(format!(
                    "{} continues into a next cabinet it does not name",
                    last.path.display()
                )))
            }
        };
        let set_id = last.metadata.info.set_id;
        let set_index = last.metadata.info.set_index.wrapping_add(1);
        let mut search = last
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut error = VolumeError::None;
        loop {
            let reply = handler.notify(Notification::NextCabinet {
                next: &next,
                path: &mut search,
                error,
            });
            if let Reply::Abort = reply {
                return Err(Error::UserAbort);
            }
            let path = search.join(&next.cabinet);
            debug!(path = %path.display(), "opening next cabinet");
            match try_open(handler, path, set_id, set_index) {
                Ok(volume) => {
                    let reply = handler.notify(Notification::CabinetInfo {
                        path: &volume.path,
                        info: &volume.metadata.info,
                        next: volume.metadata.next.as_ref(),
                    });
                    if let Reply::Abort = reply {
                        return Err(Error::UserAbort);
                    }
                    return Ok(volume);
                }
                Err((kind, problem)) => {
                    warn!(error = %problem, ?kind, "cannot use next cabinet");
                    error = kind;
                }
            }
        }
    }
}

fn try_open<H: Handler>(
    handler: &mut H,
    path: PathBuf,
    set_id: u16,
    set_index: u16,
) -> std::result::Result<Volume<H::Volume>, (VolumeError, Error)> {
    let mut reader = handler
        .open_volume(&path)
        .map_err(|error| (VolumeError::NotFound, Error::Io(error)))?;
    let metadata = CabinetMetadata::read(&mut reader)
        .map_err(|error| (VolumeError::NotACabinet, error))?;
    let info = &metadata.info;
    if info.set_id != set_id || info.set_index != set_index {
        let problem = Error::WrongCabinet(format!(
            "{} is cabinet {} of set {:#06x}, expected cabinet {} of set {:#06x}",
            path.display(),
            info.set_index,
            info.set_id,
            set_index,
            set_id
        ));
        return Err((VolumeError::WrongCabinet, problem));
    }
    Ok(Volume { path, metadata, reader })
}
