//! Indexed free-list tables shared by the big and mini allocators.
//!
//! Both the BAT and the mini-FAT are one logical array of next pointers split
//! across fixed-size table blocks. [`AllocationTable`] holds that array and
//! its block split; [`BlockAllocator`] is the allocator contract built on
//! top of it, with the chain operations implemented once for both block
//! granularities.
//!
//! Table values are either the index of the next block in a chain or one of
//! the sentinels from [`consts`](super::consts):
//! - `FREESECT` marks an unused block
//! - `ENDOFCHAIN` terminates a chain
//! - `FATSECT` / `DIFSECT` mark blocks holding the BAT or XBAT themselves

use super::consts::*;
use crate::common::binary::{read_u32_array_le, write_u32_array_le};
use crate::common::error::{Error, Result};
use fixedbitset::FixedBitSet;

/// One block's worth of table entries, remembering which block hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBlock {
    location: u32,
    entries: Vec<u32>,
}

impl TableBlock {
    /// A table block with every entry free.
    pub fn new_free(location: u32, entries_per_block: usize) -> Self {
        Self {
            location,
            entries: vec![FREESECT; entries_per_block],
        }
    }

    /// Decode a table block from the raw bytes of its host block.
    pub fn from_bytes(location: u32, data: &[u8]) -> Self {
        Self {
            location,
            entries: read_u32_array_le(data),
        }
    }

    /// Block index hosting this table block.
    #[inline]
    pub fn location(&self) -> u32 {
        self.location
    }

    /// Entry at `offset` within this block.
    #[inline]
    pub fn value_at(&self, offset: usize) -> u32 {
        self.entries[offset]
    }

    #[inline]
    pub(crate) fn set_value_at(&mut self, offset: usize, value: u32) {
        self.entries[offset] = value;
    }

    /// Whether any entry in this block is still `FREESECT`.
    pub fn has_free_sectors(&self) -> bool {
        self.entries.contains(&FREESECT)
    }

    /// Encode the entries into the host block's bytes.
    pub fn write_into(&self, data: &mut [u8]) {
        write_u32_array_le(data, &self.entries);
    }
}

/// Result of [`AllocationTable::locate`]: the table block backing a logical
/// index and the offset of the entry within it.
#[derive(Debug, Clone, Copy)]
pub struct BlockAndIndex<'a> {
    block: &'a TableBlock,
    table_index: usize,
    offset: usize,
}

impl<'a> BlockAndIndex<'a> {
    /// The backing table block.
    pub fn block(&self) -> &'a TableBlock {
        self.block
    }

    /// Position of the table block in table order.
    pub fn table_index(&self) -> usize {
        self.table_index
    }

    /// Offset of the entry within the table block.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Logical next-pointer array split across table blocks.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    entries_per_block: usize,
    blocks: Vec<TableBlock>,
    /// No table block before this one has a free entry
    free_hint: usize,
}

impl AllocationTable {
    pub fn new(entries_per_block: usize) -> Self {
        Self {
            entries_per_block,
            blocks: Vec::new(),
            free_hint: 0,
        }
    }

    #[inline]
    pub fn entries_per_block(&self) -> usize {
        self.entries_per_block
    }

    /// Number of logical indices covered by the allocated table blocks.
    #[inline]
    pub fn coverage(&self) -> u32 {
        (self.blocks.len() * self.entries_per_block) as u32
    }

    /// Number of table blocks.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[TableBlock] {
        &self.blocks
    }

    /// Host block of every table block, in table order.
    pub fn locations(&self) -> Vec<u32> {
        self.blocks.iter().map(TableBlock::location).collect()
    }

    /// Resolve the table block and offset backing `index`.
    pub fn locate(&self, index: u32) -> Result<BlockAndIndex<'_>> {
        let (table_index, offset) = self.split(index)?;
        Ok(BlockAndIndex {
            block: &self.blocks[table_index],
            table_index,
            offset,
        })
    }

    /// Stored next pointer of `index`.
    pub fn next_of(&self, index: u32) -> Result<u32> {
        let (table_index, offset) = self.split(index)?;
        Ok(self.blocks[table_index].value_at(offset))
    }

    /// Overwrite the next pointer of `index`.
    pub fn set_next(&mut self, index: u32, value: u32) -> Result<()> {
        let (table_index, offset) = self.split(index)?;
        self.blocks[table_index].set_value_at(offset, value);
        if value == FREESECT && table_index < self.free_hint {
            self.free_hint = table_index;
        }
        Ok(())
    }

    /// Follow a chain through this table; see [`BlockAllocator::chain`].
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        follow_chain(start, |index| self.next_of(index))
    }

    /// First free index in table-block order.
    pub fn first_free(&mut self) -> Option<u32> {
        for i in self.free_hint..self.blocks.len() {
            if let Some(offset) = self.blocks[i].entries.iter().position(|&v| v == FREESECT) {
                self.free_hint = i;
                return Some((i * self.entries_per_block + offset) as u32);
            }
        }
        self.free_hint = self.blocks.len();
        None
    }

    /// Number of entries holding exactly `value`.
    pub fn count_entries(&self, value: u32) -> usize {
        self.blocks
            .iter()
            .map(|block| block.entries.iter().filter(|&&v| v == value).count())
            .sum()
    }

    /// Highest index whose entry is not `FREESECT`.
    pub fn last_used(&self) -> Option<u32> {
        self.blocks
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, block)| {
                block
                    .entries
                    .iter()
                    .rposition(|&value| value != FREESECT)
                    .map(|offset| (i * self.entries_per_block + offset) as u32)
            })
    }

    /// Append an all-free table block hosted at `location`.
    ///
    /// Returns the first logical index the new block covers.
    pub fn push_free_block(&mut self, location: u32) -> u32 {
        let first = self.coverage();
        self.blocks
            .push(TableBlock::new_free(location, self.entries_per_block));
        first
    }

    /// Append a table block decoded from its host block's bytes.
    pub fn push_block_bytes(&mut self, location: u32, data: &[u8]) {
        let mut block = TableBlock::from_bytes(location, data);
        block.entries.resize(self.entries_per_block, FREESECT);
        self.blocks.push(block);
    }

    /// Append a prepared table block.
    pub(crate) fn push_block(&mut self, mut block: TableBlock) {
        block.entries.resize(self.entries_per_block, FREESECT);
        self.blocks.push(block);
    }

    fn split(&self, index: u32) -> Result<(usize, usize)> {
        let table_index = index as usize / self.entries_per_block;
        if table_index >= self.blocks.len() {
            return Err(Error::OutOfRange {
                index,
                coverage: self.coverage(),
            });
        }
        Ok((table_index, index as usize % self.entries_per_block))
    }
}

/// Walk a chain from `start` using `next_of`, detecting loops.
fn follow_chain<F>(start: u32, mut next_of: F) -> Result<Vec<u32>>
where
    F: FnMut(u32) -> Result<u32>,
{
    let mut blocks = Vec::new();
    let mut visited = FixedBitSet::new();
    let mut current = start;

    while current != ENDOFCHAIN {
        if is_sentinel(current) {
            return Err(Error::CorruptedFile(format!(
                "chain starting at {} reaches reserved value {:#010x}",
                start, current
            )));
        }

        // Resolving the link first keeps `visited` within the table size
        let next = next_of(current).map_err(|e| match e {
            Error::OutOfRange { index, coverage } => Error::CorruptedFile(format!(
                "chain starting at {} links to block {} outside the table ({} entries)",
                start, index, coverage
            )),
            other => other,
        })?;

        let idx = current as usize;
        if idx >= visited.len() {
            visited.grow(idx + 1);
        }
        if visited.put(idx) {
            return Err(Error::CorruptedFile(format!(
                "chain starting at {} loops back to block {}",
                start, current
            )));
        }

        blocks.push(current);
        current = next;
    }

    Ok(blocks)
}

/// Allocator contract shared by the BAT and the mini store.
///
/// Implementors provide table access, free-block search and raw block
/// access; chain walking, allocation and release are built on those.
pub trait BlockAllocator {
    /// Size in bytes of the blocks this allocator hands out.
    fn block_size(&self) -> usize;

    /// Stored next pointer of `index`; range error past the table coverage.
    fn next_of(&self, index: u32) -> Result<u32>;

    /// Overwrite the next pointer of `index`; range error past the table coverage.
    fn set_next(&mut self, index: u32, next: u32) -> Result<()>;

    /// First free block, extending the table when none is left.
    ///
    /// The returned block is not marked as used.
    fn find_free_block(&mut self) -> Result<u32>;

    /// Contents of block `index`.
    fn read_block(&self, index: u32) -> Result<&[u8]>;

    /// Writable contents of block `index`, growing the backing storage as needed.
    fn write_block(&mut self, index: u32) -> Result<&mut [u8]>;

    /// Follow a chain from `start` until `ENDOFCHAIN`.
    ///
    /// Fails with a corrupt-file error if the chain loops, runs into a
    /// reserved value, or leaves the table.
    fn chain(&self, start: u32) -> Result<Vec<u32>> {
        follow_chain(start, |index| self.next_of(index))
    }

    /// Allocate a fresh chain of `count` blocks.
    ///
    /// Returns the first block, or `ENDOFCHAIN` when `count` is zero.
    fn allocate_chain(&mut self, count: usize) -> Result<u32> {
        self.resize_chain(ENDOFCHAIN, count)
    }

    /// Grow or shrink the chain starting at `start` to exactly `count` blocks.
    ///
    /// Surplus blocks are released; new blocks are appended at the tail.
    /// Returns the (possibly new) start of the chain.
    fn resize_chain(&mut self, start: u32, count: usize) -> Result<u32> {
        let mut blocks = if start == ENDOFCHAIN {
            Vec::new()
        } else {
            self.chain(start)?
        };

        if blocks.len() >= count {
            for &block in &blocks[count..] {
                self.set_next(block, FREESECT)?;
            }
            blocks.truncate(count);
            return match blocks.last() {
                Some(&last) => {
                    self.set_next(last, ENDOFCHAIN)?;
                    Ok(blocks[0])
                },
                None => Ok(ENDOFCHAIN),
            };
        }

        while blocks.len() < count {
            let block = self.find_free_block()?;
            self.set_next(block, ENDOFCHAIN)?;
            if let Some(&prev) = blocks.last() {
                self.set_next(prev, block)?;
            }
            blocks.push(block);
        }

        Ok(blocks[0])
    }

    /// Release every block of a chain.
    fn free_chain(&mut self, start: u32) -> Result<()> {
        if start == ENDOFCHAIN {
            return Ok(());
        }
        for block in self.chain(start)? {
            self.set_next(block, FREESECT)?;
        }
        Ok(())
    }

    /// Store `data` in the chain starting at `start`, resizing it to fit.
    ///
    /// The tail of the final block is zero-filled. Returns the chain start.
    fn write_chain(&mut self, start: u32, data: &[u8]) -> Result<u32> {
        let block_size = self.block_size();
        let count = data.len().div_ceil(block_size);
        let start = self.resize_chain(start, count)?;
        if count == 0 {
            return Ok(start);
        }

        for (block, chunk) in self.chain(start)?.into_iter().zip(data.chunks(block_size)) {
            let target = self.write_block(block)?;
            target[..chunk.len()].copy_from_slice(chunk);
            target[chunk.len()..].fill(0);
        }
        Ok(start)
    }

    /// Read `size` bytes from the chain starting at `start`.
    fn read_chain(&self, start: u32, size: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(size);
        if size == 0 {
            return Ok(data);
        }
        for block in self.chain(start)? {
            let remaining = size - data.len();
            let bytes = self.read_block(block)?;
            data.extend_from_slice(&bytes[..remaining.min(bytes.len())]);
            if data.len() == size {
                return Ok(data);
            }
        }
        Err(Error::CorruptedFile(format!(
            "chain starting at {} holds {} of {} bytes",
            start,
            data.len(),
            size
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-size allocator over plain memory, for exercising the trait defaults.
    struct VecAllocator {
        table: AllocationTable,
        blocks: Vec<Vec<u8>>,
    }

    impl VecAllocator {
        fn new(table_blocks: usize) -> Self {
            let mut table = AllocationTable::new(8);
            for i in 0..table_blocks {
                table.push_free_block(i as u32);
            }
            Self {
                table,
                blocks: vec![vec![0u8; 16]; table_blocks * 8],
            }
        }
    }

    impl BlockAllocator for VecAllocator {
        fn block_size(&self) -> usize {
            16
        }

        fn next_of(&self, index: u32) -> Result<u32> {
            self.table.next_of(index)
        }

        fn set_next(&mut self, index: u32, next: u32) -> Result<()> {
            self.table.set_next(index, next)
        }

        fn find_free_block(&mut self) -> Result<u32> {
            self.table.first_free().ok_or(Error::OutOfRange {
                index: self.table.coverage(),
                coverage: self.table.coverage(),
            })
        }

        fn read_block(&self, index: u32) -> Result<&[u8]> {
            Ok(&self.blocks[index as usize])
        }

        fn write_block(&mut self, index: u32) -> Result<&mut [u8]> {
            Ok(&mut self.blocks[index as usize])
        }
    }

    #[test]
    fn test_locate_and_range() {
        let mut table = AllocationTable::new(128);
        table.push_free_block(99);

        let located = table.locate(127).unwrap();
        assert_eq!(located.block().location(), 99);
        assert_eq!(located.offset(), 127);
        assert_eq!(located.table_index(), 0);
        assert!(matches!(
            table.locate(128),
            Err(Error::OutOfRange {
                index: 128,
                coverage: 128
            })
        ));
    }

    #[test]
    fn test_first_free_skips_full_blocks() {
        let mut table = AllocationTable::new(4);
        table.push_free_block(0);
        table.push_free_block(1);
        for i in 0..4 {
            table.set_next(i, ENDOFCHAIN).unwrap();
        }
        table.set_next(4, ENDOFCHAIN).unwrap();

        assert!(!table.blocks()[0].has_free_sectors());
        assert_eq!(table.first_free(), Some(5));
        assert_eq!(table.last_used(), Some(4));
        assert_eq!(table.count_entries(ENDOFCHAIN), 5);

        // Freeing an entry in an earlier block makes it visible again
        table.set_next(2, FREESECT).unwrap();
        assert_eq!(table.first_free(), Some(2));
    }

    #[test]
    fn test_block_bytes_round_trip() {
        let mut block = TableBlock::new_free(3, 4);
        block.set_value_at(0, 1);
        block.set_value_at(1, ENDOFCHAIN);
        let mut bytes = [0u8; 16];
        block.write_into(&mut bytes);
        assert_eq!(TableBlock::from_bytes(3, &bytes), block);
    }

    #[test]
    fn test_chain_allocation_and_reuse() {
        let mut alloc = VecAllocator::new(2);
        let start = alloc.allocate_chain(3).unwrap();
        assert_eq!(alloc.chain(start).unwrap(), vec![0, 1, 2]);

        let other = alloc.allocate_chain(2).unwrap();
        assert_eq!(alloc.chain(other).unwrap(), vec![3, 4]);

        alloc.free_chain(start).unwrap();
        assert_eq!(alloc.next_of(1).unwrap(), FREESECT);
        assert_eq!(alloc.find_free_block().unwrap(), 0);
    }

    #[test]
    fn test_resize_chain() {
        let mut alloc = VecAllocator::new(2);
        let start = alloc.allocate_chain(4).unwrap();
        let start = alloc.resize_chain(start, 2).unwrap();
        assert_eq!(alloc.chain(start).unwrap(), vec![0, 1]);
        assert_eq!(alloc.next_of(2).unwrap(), FREESECT);

        assert_eq!(alloc.resize_chain(start, 0).unwrap(), ENDOFCHAIN);
        assert_eq!(alloc.next_of(0).unwrap(), FREESECT);
    }

    #[test]
    fn test_write_and_read_chain() {
        let mut alloc = VecAllocator::new(2);
        let data: Vec<u8> = (0..40).collect();
        let start = alloc.write_chain(ENDOFCHAIN, &data).unwrap();
        assert_eq!(alloc.chain(start).unwrap().len(), 3);
        assert_eq!(alloc.read_chain(start, 40).unwrap(), data);
        assert!(matches!(
            alloc.read_chain(start, 64),
            Err(Error::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_chain_loop_detected() {
        let mut alloc = VecAllocator::new(1);
        alloc.set_next(0, 1).unwrap();
        alloc.set_next(1, 0).unwrap();
        assert!(matches!(alloc.chain(0), Err(Error::CorruptedFile(_))));
    }

    #[test]
    fn test_chain_leaving_table() {
        let mut alloc = VecAllocator::new(1);
        alloc.set_next(0, 40).unwrap();
        assert!(matches!(alloc.chain(0), Err(Error::CorruptedFile(_))));
    }

    #[test]
    fn test_chain_into_free_block() {
        let mut alloc = VecAllocator::new(1);
        alloc.set_next(0, 1).unwrap();
        assert!(matches!(alloc.chain(0), Err(Error::CorruptedFile(_))));
    }
}
