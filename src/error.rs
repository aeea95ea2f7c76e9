//! Error types for cabinet parsing and decompression.

use std::io;

use thiserror::Error;

/// Everything that can go wrong while reading or decompressing a cabinet.
#[derive(Debug, Error)]
pub enum Error {
    /// The compressed input ran out before the decoder was done with it.
    #[error("compressed input ended prematurely")]
    InputTruncated,

    /// The compressed stream is malformed.
    #[error("illegal compressed data: {0}")]
    IllegalData(String),

    /// A value in the compressed stream or folder header is out of its legal
    /// range (for example an unsupported window size).
    #[error("compressed data out of range: {0}")]
    DataFormat(String),

    /// An uncompressed block whose stored size differs from its declared
    /// uncompressed size.
    #[error(
        "stored block is {compressed} bytes but should expand to {uncompressed}"
    )]
    SizeMismatch {
        /// Size of the stored payload.
        compressed: usize,
        /// Declared uncompressed size.
        uncompressed: usize,
    },

    /// A data block failed its checksum test.
    #[error("checksum mismatch (expected {expected:08x}, actual {actual:08x})")]
    ChecksumMismatch {
        /// Checksum stored in the block header.
        expected: u32,
        /// Checksum computed over the block.
        actual: u32,
    },

    /// A decompression window could not be allocated.
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// The raw block input could not be read or exceeds the input buffer.
    #[error("bad data block input: {0}")]
    InputError(String),

    /// The file is not a cabinet at all.
    #[error("not a cabinet file: {0}")]
    NotACabinet(String),

    /// The cabinet uses a format version newer than this crate understands.
    #[error("version {major}.{minor} cabinet files are not supported")]
    UnknownCabinetVersion {
        /// Major format version.
        major: u8,
        /// Minor format version.
        minor: u8,
    },

    /// The cabinet metadata is inconsistent.
    #[error("corrupt cabinet: {0}")]
    CorruptCabinet(String),

    /// A continuation volume belongs to a different cabinet set or is out of
    /// sequence.
    #[error("wrong cabinet: {0}")]
    WrongCabinet(String),

    /// The notification handler asked for the operation to stop.
    #[error("operation aborted by the notification handler")]
    UserAbort,

    /// An I/O error from the underlying reader or output handle.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(error: Error) -> io::Error {
        match error {
            Error::Io(error) => error,
            Error::UserAbort => io::Error::new(io::ErrorKind::Other, error),
            Error::OutOfMemory(_) => {
                io::Error::new(io::ErrorKind::OutOfMemory, error)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Maps an early end-of-file while parsing metadata to a cabinet error.
pub(crate) fn eof_as(error: io::Error, what: impl FnOnce() -> Error) -> Error {
    if error.kind() == io::ErrorKind::UnexpectedEof {
        what()
    } else {
        Error::Io(error)
    }
}
