pub const FILE_SIGNATURE: u32 = 0x4643534d; // "MSCF" stored little-endian

pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 3;

pub const MAX_HEADER_RESERVE_SIZE: usize = 60_000;

// Strings are read in growing chunks, starting here and never past the cap.
pub const STRING_CHUNK_SIZE: usize = 256;
pub const MAX_STRING_SIZE: usize = 0x10000;

// Data blocks:
pub const MAX_BLOCK_SIZE: usize = 0x8000;
pub const MAX_INPUT_SIZE: usize = MAX_BLOCK_SIZE + 6144;

// Header flags:
pub const FLAG_PREV_CABINET: u16 = 0x1;
pub const FLAG_NEXT_CABINET: u16 = 0x2;
pub const FLAG_RESERVE_PRESENT: u16 = 0x4;

// Special folder indices in file entries:
pub const IFOLD_CONTINUED_FROM_PREV: u16 = 0xfffd;
pub const IFOLD_CONTINUED_TO_NEXT: u16 = 0xfffe;

// File attributes:
pub const ATTR_READ_ONLY: u16 = 0x01;
pub const ATTR_HIDDEN: u16 = 0x02;
pub const ATTR_SYSTEM: u16 = 0x04;
pub const ATTR_ARCH: u16 = 0x20;
pub const ATTR_EXEC: u16 = 0x40;
pub const ATTR_NAME_IS_UTF: u16 = 0x80;
