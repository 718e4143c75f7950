//! Constants for the compound file format.
//!
//! Sector sentinels and record sizes follow MS-CFB; the names match the ones
//! used by the AAF reference headers.

/// Magic bytes that should be at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the meaningful part of the header block
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Sector size for version 3 files (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Sector size for version 4 files (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Size of a mini sector in the mini stream
pub const MINI_SECTOR_SIZE: usize = 64;

/// log2 of [`MINI_SECTOR_SIZE`]
pub const MINI_SECTOR_SHIFT: u16 = 6;

/// Streams smaller than this many bytes live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of BAT block pointers stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Byte-order mark stored at offset 0x1C
pub const BYTE_ORDER_LE: u16 = 0xFFFE;

/// Minor version written into new headers
pub const MINOR_VERSION: u16 = 0x003E;

// Sector IDs (from AAF specifications)
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs (from AAF specifications)
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage (from AAF specifications)
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

/// Red-black tree node colors
pub const NODE_RED: u8 = 0;
pub const NODE_BLACK: u8 = 1;

/// Longest entry name in UTF-16 code units, excluding the terminator
pub const MAX_NAME_UNITS: usize = 31;

/// Name given to the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Whether `value` is one of the reserved sector sentinels rather than a block.
#[inline]
pub const fn is_sentinel(value: u32) -> bool {
    value > MAXREGSECT
}
