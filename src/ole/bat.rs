//! Block Allocation Table (BAT) and its XBAT extension.
//!
//! The BAT is the next-pointer table over every big block of the file. Its
//! own blocks are located through the header (first 109) and then through
//! a chain of XBAT blocks, each holding `entries_per_block - 1` BAT block
//! pointers followed by the index of the next XBAT block.
//!
//! # Growth
//!
//! When no free entry is left, [`find_free_block`](BlockAllocator::find_free_block)
//! adds one BAT block at the first index it covers and marks it `FATSECT`.
//! Once 109 BAT blocks exist, every further BAT block pointer goes into the
//! XBAT chain; a new XBAT block (marked `DIFSECT`, placed right after the new
//! BAT block) is added whenever the existing XBAT blocks are full.

use super::alloc::{AllocationTable, BlockAllocator, BlockAndIndex, TableBlock};
use super::block_store::BlockStore;
use super::consts::*;
use super::header::HeaderBlock;
use super::options::BlockSize;
use crate::common::binary::{read_u32_le, write_u32_array_le, write_u32_le};
use crate::common::error::{Error, Result};
use fixedbitset::FixedBitSet;

/// The big-block allocator: block store plus BAT/XBAT bookkeeping.
#[derive(Debug, Clone)]
pub struct BlockAllocationTable {
    store: BlockStore,
    table: AllocationTable,
    /// Locations of the XBAT blocks, in chain order
    xbat_locations: Vec<u32>,
}

impl BlockAllocationTable {
    /// Allocator for a brand new file: one BAT block hosted at block 0.
    pub fn create(block_size: BlockSize) -> Self {
        let mut bat = Self {
            store: BlockStore::new(block_size),
            table: AllocationTable::new(block_size.bat_entries_per_block()),
            xbat_locations: Vec::new(),
        };
        // The first table block hosts itself at index 0
        let mut first = TableBlock::new_free(0, block_size.bat_entries_per_block());
        first.set_value_at(0, FATSECT);
        bat.table.push_block(first);
        bat.store.ensure_block(0);
        bat
    }

    /// Load the BAT described by `header` from `store`.
    pub fn load(header: &HeaderBlock, store: BlockStore) -> Result<Self> {
        let geometry = store.geometry();
        let per_xbat = geometry.xbat_entries_per_block();
        let bat_count = header.bat_count() as usize;

        // Every BAT and XBAT block is a block of the file
        let block_count = store.block_count() as usize;
        let xbat_count = header.xbat_count() as usize;
        if bat_count + xbat_count > block_count {
            return Err(Error::InvalidFormat(format!(
                "header declares {} BAT and {} XBAT blocks in a file of {} blocks",
                bat_count, xbat_count, block_count
            )));
        }

        let mut locations: Vec<u32> = header.inline_bat().to_vec();
        let mut xbat_locations = Vec::new();
        let mut visited = FixedBitSet::with_capacity(block_count);
        let mut xbat = header.xbat_start();

        for _ in 0..xbat_count {
            if is_sentinel(xbat) {
                return Err(Error::CorruptedFile(format!(
                    "XBAT chain ends after {} of {} blocks",
                    xbat_locations.len(),
                    xbat_count
                )));
            }
            let data = store.block(xbat)?;
            if visited.put(xbat as usize) {
                return Err(Error::CorruptedFile(format!(
                    "XBAT chain loops back to block {}",
                    xbat
                )));
            }
            let wanted = (bat_count - locations.len()).min(per_xbat);
            for i in 0..wanted {
                locations.push(read_u32_le(data, i * 4)?);
            }
            xbat_locations.push(xbat);
            xbat = read_u32_le(data, per_xbat * 4)?;
        }

        if locations.len() != bat_count {
            return Err(Error::InvalidFormat(format!(
                "header declares {} BAT blocks, found {}",
                bat_count,
                locations.len()
            )));
        }

        let mut table = AllocationTable::new(geometry.bat_entries_per_block());
        for &location in &locations {
            if is_sentinel(location) {
                return Err(Error::InvalidFormat(format!(
                    "BAT block location {:#010x} is a reserved value",
                    location
                )));
            }
            table.push_block_bytes(location, store.block(location)?);
        }

        log::debug!(
            "loaded {} BAT blocks and {} XBAT blocks over {} data blocks",
            locations.len(),
            xbat_locations.len(),
            store.block_count()
        );

        Ok(Self {
            store,
            table,
            xbat_locations,
        })
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn geometry(&self) -> BlockSize {
        self.store.geometry()
    }

    /// The underlying next-pointer table.
    pub fn table(&self) -> &AllocationTable {
        &self.table
    }

    /// Resolve the BAT block and offset backing `index`.
    pub fn locate(&self, index: u32) -> Result<BlockAndIndex<'_>> {
        self.table.locate(index)
    }

    /// Number of BAT blocks.
    pub fn bat_count(&self) -> usize {
        self.table.block_count()
    }

    /// Number of XBAT blocks.
    pub fn xbat_count(&self) -> usize {
        self.xbat_locations.len()
    }

    /// Locations of every BAT block, in table order.
    pub fn bat_locations(&self) -> Vec<u32> {
        self.table.locations()
    }

    pub fn xbat_locations(&self) -> &[u32] {
        &self.xbat_locations
    }

    /// Write the BAT and XBAT blocks into their host blocks and record their
    /// locations in `header`.
    pub(crate) fn flush(&mut self, header: &mut HeaderBlock) {
        // Every index claimed by the table must exist as a block in the output
        if let Some(last) = self.table.last_used() {
            self.store.ensure_block(last);
        }

        for block in self.table.blocks() {
            block.write_into(self.store.block_mut(block.location()));
        }

        let locations = self.table.locations();
        header.set_bat_locations(&locations);

        let per_xbat = self.geometry().xbat_entries_per_block();
        let overflow = locations.get(HEADER_DIFAT_ENTRIES..).unwrap_or(&[]);
        for (i, &xbat) in self.xbat_locations.iter().enumerate() {
            let pointers: Vec<u32> = overflow.iter().skip(i * per_xbat).take(per_xbat).copied().collect();
            let next = self
                .xbat_locations
                .get(i + 1)
                .copied()
                .unwrap_or(ENDOFCHAIN);

            let data = self.store.block_mut(xbat);
            data.fill(0xFF);
            write_u32_array_le(data, &pointers);
            write_u32_le(data, per_xbat * 4, next);
        }

        let xbat_start = self.xbat_locations.first().copied().unwrap_or(ENDOFCHAIN);
        header.set_xbat(xbat_start, self.xbat_locations.len() as u32);
    }

    /// Add one BAT block (and an XBAT block when needed) at the end of the table.
    fn extend(&mut self) -> Result<()> {
        let offset = self.table.coverage();
        let existing = self.table.block_count();

        self.table.push_free_block(offset);
        self.table.set_next(offset, FATSECT)?;
        self.store.ensure_block(offset);

        if existing >= HEADER_DIFAT_ENTRIES {
            let per_xbat = self.geometry().xbat_entries_per_block();
            let overflow = existing + 1 - HEADER_DIFAT_ENTRIES;
            if overflow > self.xbat_locations.len() * per_xbat {
                let xbat = offset + 1;
                self.table.set_next(xbat, DIFSECT)?;
                self.store.ensure_block(xbat);
                self.xbat_locations.push(xbat);
                log::trace!(
                    "added XBAT block {} (XBAT count {})",
                    xbat,
                    self.xbat_locations.len()
                );
            }
        }

        log::trace!(
            "added BAT block {} (BAT count {})",
            offset,
            self.table.block_count()
        );
        Ok(())
    }
}

impl BlockAllocator for BlockAllocationTable {
    fn block_size(&self) -> usize {
        self.store.block_size()
    }

    fn next_of(&self, index: u32) -> Result<u32> {
        self.table.next_of(index)
    }

    fn set_next(&mut self, index: u32, next: u32) -> Result<()> {
        self.table.set_next(index, next)
    }

    fn find_free_block(&mut self) -> Result<u32> {
        if let Some(free) = self.table.first_free() {
            return Ok(free);
        }

        self.extend()?;
        self.table.first_free().ok_or_else(|| {
            Error::CorruptedFile("no free entry after extending the BAT".to_string())
        })
    }

    fn read_block(&self, index: u32) -> Result<&[u8]> {
        self.store.block(index)
    }

    fn write_block(&mut self, index: u32) -> Result<&mut [u8]> {
        if is_sentinel(index) {
            return Err(Error::OutOfRange {
                index,
                coverage: self.table.coverage(),
            });
        }
        Ok(self.store.block_mut(index))
    }
}
