//! Configuration for newly created compound files.
//!
//! Opened files take their geometry from the header; these options only
//! matter for [`OleFileSystem::create_with`](super::OleFileSystem::create_with).

use super::consts::{SECTOR_SIZE_V3, SECTOR_SIZE_V4};
use serde::{Deserialize, Serialize};

/// Big block geometry of a compound file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlockSize {
    /// 512-byte blocks (major version 3)
    #[default]
    Small,
    /// 4096-byte blocks (major version 4)
    Large,
}

impl BlockSize {
    /// Map a header sector shift to a block size.
    pub const fn from_shift(shift: u16) -> Option<Self> {
        match shift {
            9 => Some(BlockSize::Small),
            12 => Some(BlockSize::Large),
            _ => None,
        }
    }

    /// Block size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            BlockSize::Small => SECTOR_SIZE_V3,
            BlockSize::Large => SECTOR_SIZE_V4,
        }
    }

    /// log2 of the block size, as stored in the header.
    #[inline]
    pub const fn shift(self) -> u16 {
        match self {
            BlockSize::Small => 9,
            BlockSize::Large => 12,
        }
    }

    /// Header major version that goes with this block size.
    #[inline]
    pub const fn major_version(self) -> u16 {
        match self {
            BlockSize::Small => 3,
            BlockSize::Large => 4,
        }
    }

    /// Number of 4-byte table entries in one block.
    #[inline]
    pub const fn bat_entries_per_block(self) -> usize {
        self.bytes() / 4
    }

    /// Number of BAT pointers in one XBAT block; the last slot chains to the next XBAT block.
    #[inline]
    pub const fn xbat_entries_per_block(self) -> usize {
        self.bat_entries_per_block() - 1
    }
}

/// Options for creating a new compound file.
///
/// # Examples
///
/// ```rust
/// use olestore::ole::{BlockSize, OleOptions};
///
/// let options = OleOptions::new().with_block_size(BlockSize::Large);
/// assert_eq!(options.block_size.bytes(), 4096);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OleOptions {
    /// Block geometry of the new file
    pub block_size: BlockSize,
}

impl OleOptions {
    /// Create options with default values (512-byte blocks).
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block geometry.
    #[inline]
    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(BlockSize::Small.bat_entries_per_block(), 128);
        assert_eq!(BlockSize::Small.xbat_entries_per_block(), 127);
        assert_eq!(BlockSize::Large.bat_entries_per_block(), 1024);
        assert_eq!(BlockSize::Large.xbat_entries_per_block(), 1023);
    }

    #[test]
    fn test_from_shift() {
        assert_eq!(BlockSize::from_shift(9), Some(BlockSize::Small));
        assert_eq!(BlockSize::from_shift(12), Some(BlockSize::Large));
        assert_eq!(BlockSize::from_shift(10), None);
    }

    #[test]
    fn test_default_options() {
        let options = OleOptions::new();
        assert_eq!(options.block_size, BlockSize::Small);
    }
}
