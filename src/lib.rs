//! A library for decompressing [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB) files,
//! including sets of cabinets whose folders span several volumes.
//!
//! Two ways in are provided:
//!
//! * [`Cabinet`] opens a single cabinet for random access to its metadata
//!   and its files' contents.
//! * [`Extractor`] walks every file of a cabinet in order, reporting each
//!   step to a [`Handler`] and following folders that continue into later
//!   cabinets of the set.
//!
//! All four compression methods are supported: stored, MSZIP, Quantum and
//! LZX.

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod bits;
mod block;
mod cabinet;
mod checksum;
mod consts;
mod continuation;
mod ctype;
mod datetime;
mod decompressor;
mod error;
mod extract;
mod file;
mod folder;
mod huffman;
mod lzx;
mod mszip;
mod notify;
mod quantum;
mod string;
mod window;

pub use crate::cabinet::{probe, Cabinet, CabinetInfo, VolumeName};
pub use crate::checksum::checksum;
pub use crate::ctype::CompressionType;
pub use crate::error::{Error, Result};
pub use crate::extract::Extractor;
pub use crate::file::{FileEntries, FileEntry, FileReader};
pub use crate::folder::{FolderEntries, FolderEntry};
pub use crate::notify::{Handler, Notification, Reply, VolumeError};
