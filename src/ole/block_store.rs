//! The file body as an indexed sequence of fixed-size blocks.
//!
//! Block `i` occupies bytes `(i + 1) * block_size ..` of the file; the header
//! block in front of it is not part of the store. Allocation tables, the
//! property table, the mini stream and every big document all address this
//! store by block index.

use super::options::BlockSize;
use crate::common::error::{Error, Result};

/// In-memory block storage.
#[derive(Debug, Clone)]
pub struct BlockStore {
    block_size: BlockSize,
    data: Vec<u8>,
}

impl BlockStore {
    /// Create an empty store.
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            data: Vec::new(),
        }
    }

    /// Wrap the bytes following the header block.
    ///
    /// A trailing partial block is zero-padded to a full block.
    pub fn from_bytes(block_size: BlockSize, body: &[u8]) -> Self {
        let size = block_size.bytes();
        let mut data = body.to_vec();
        let remainder = data.len() % size;
        if remainder != 0 {
            log::warn!(
                "file body ends with a partial block of {} bytes, padding",
                remainder
            );
            data.resize(data.len() + size - remainder, 0);
        }
        Self { block_size, data }
    }

    /// Block size in bytes.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size.bytes()
    }

    #[inline]
    pub fn geometry(&self) -> BlockSize {
        self.block_size
    }

    /// Number of blocks currently in the store.
    #[inline]
    pub fn block_count(&self) -> u32 {
        (self.data.len() / self.block_size()) as u32
    }

    /// Read block `index`.
    pub fn block(&self, index: u32) -> Result<&[u8]> {
        if index >= self.block_count() {
            return Err(Error::CorruptedFile(format!(
                "block {} is beyond the end of the file ({} blocks)",
                index,
                self.block_count()
            )));
        }
        let start = index as usize * self.block_size();
        Ok(&self.data[start..start + self.block_size()])
    }

    /// Mutable access to block `index`, growing the store with zeroed blocks if needed.
    pub(crate) fn block_mut(&mut self, index: u32) -> &mut [u8] {
        self.ensure_block(index);
        let size = self.block_size();
        let start = index as usize * size;
        &mut self.data[start..start + size]
    }

    /// Grow the store so that `index` is a valid block.
    pub(crate) fn ensure_block(&mut self, index: u32) {
        let needed = (index as usize + 1) * self.block_size();
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
    }

    /// Raw bytes of all blocks, in block order.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_access() {
        let mut body = vec![0u8; 1024];
        body[512] = 0xAB;
        let store = BlockStore::from_bytes(BlockSize::Small, &body);

        assert_eq!(store.block_count(), 2);
        assert_eq!(store.block(1).unwrap()[0], 0xAB);
        assert!(matches!(store.block(2), Err(Error::CorruptedFile(_))));
    }

    #[test]
    fn test_partial_block_is_padded() {
        let store = BlockStore::from_bytes(BlockSize::Small, &[1u8; 700]);
        assert_eq!(store.block_count(), 2);
        assert_eq!(store.block(1).unwrap()[187], 1);
        assert_eq!(store.block(1).unwrap()[188], 0);
    }

    #[test]
    fn test_growth() {
        let mut store = BlockStore::new(BlockSize::Large);
        assert_eq!(store.block_count(), 0);
        store.block_mut(2)[0] = 7;
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.block(2).unwrap()[0], 7);
        assert_eq!(store.as_bytes().len(), 3 * 4096);
    }
}
