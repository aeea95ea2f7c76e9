//! The notification protocol between [`Extractor`](crate::Extractor) and
//! its caller.

use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::cabinet::{CabinetInfo, VolumeName};
use crate::file::FileEntry;

/// Why the most recent attempt to open a continuation cabinet failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeError {
    /// No failure; this is the first attempt.
    None,
    /// The cabinet could not be opened.
    NotFound,
    /// The file that was opened is not a readable cabinet.
    NotACabinet,
    /// The cabinet belongs to another set or is not the next one in this
    /// set.
    WrongCabinet,
}

/// An event reported while walking a cabinet set.
pub enum Notification<'a, W> {
    /// A cabinet has been opened, either the first one or a continuation.
    CabinetInfo {
        /// Path the cabinet was opened from.
        path: &'a Path,
        /// Header fields of the cabinet.
        info: &'a CabinetInfo,
        /// The next cabinet in the set, if any.
        next: Option<&'a VolumeName>,
    },
    /// A file whose data starts in an earlier cabinet of the set; it is
    /// extracted (if at all) while walking that cabinet, and skipped here.
    PartialFile {
        /// The file entry.
        file: &'a FileEntry,
        /// The cabinet the file starts in, if named.
        previous: Option<&'a VolumeName>,
    },
    /// A file is about to be extracted.  Reply with
    /// [`Reply::Extract`] to receive its data, [`Reply::Skip`] to skip it.
    CopyFile {
        /// The file entry.
        file: &'a FileEntry,
    },
    /// All of a file's data has been written to `output`, which is handed
    /// back to be flushed or closed.
    CloseFile {
        /// The file entry.
        file: &'a FileEntry,
        /// The output given in reply to [`Notification::CopyFile`].
        output: W,
        /// True if the file is marked to be run after extraction.
        execute: bool,
    },
    /// The data continues in the next cabinet of the set, which could not be
    /// opened yet (or, on a retry, was rejected for `error`).  The handler
    /// may correct `path` before replying [`Reply::Continue`] to retry.
    NextCabinet {
        /// The cabinet being looked for.
        next: &'a VolumeName,
        /// Where it will be looked for.
        path: &'a mut PathBuf,
        /// Why the previous attempt failed.
        error: VolumeError,
    },
    /// Sent before the first file record is examined and after the last.
    Enumerate {
        /// File records left to walk in the current cabinet.
        files_remaining: usize,
    },
}

/// A handler's answer to a [`Notification`].
pub enum Reply<W> {
    /// Carry on.
    Continue,
    /// Skip the file offered by [`Notification::CopyFile`].
    Skip,
    /// Extract the file offered by [`Notification::CopyFile`] into `W`.
    Extract(W),
    /// Stop the whole operation with [`Error::UserAbort`](crate::Error).
    Abort,
}

/// The caller's side of an extraction: it opens cabinets and receives
/// notifications.
pub trait Handler {
    /// A readable cabinet volume.
    type Volume: Read + Seek;
    /// Destination for an extracted file.
    type Output: Write;

    /// Opens the cabinet at `path`.
    fn open_volume(&mut self, path: &Path) -> io::Result<Self::Volume>;

    /// Reacts to an event.  Returning [`Reply::Abort`] from any
    /// notification stops the walk.
    fn notify(
        &mut self,
        notification: Notification<'_, Self::Output>,
    ) -> Reply<Self::Output>;
}
