//! Mini store: 64-byte mini-sectors for documents below the cutoff.
//!
//! The mini-FAT (SBAT) is an ordinary chain in the big-block store, located
//! by the header. Mini-sector `k` lives at byte `k * 64` of the mini stream,
//! which is the big-block chain owned by the root entry.
//!
//! [`MiniStore`] owns the decoded mini-FAT and a cached copy of the mini
//! stream chain. Anything that needs to allocate goes through a
//! [`MiniAllocator`], which borrows the store together with the BAT so that
//! mini-FAT and mini-stream growth can claim big blocks.

use super::alloc::{AllocationTable, BlockAllocator, BlockAndIndex};
use super::bat::BlockAllocationTable;
use super::consts::*;
use super::header::HeaderBlock;
use crate::common::error::{Error, Result};

/// Decoded mini-FAT plus the location of the mini stream.
#[derive(Debug, Clone)]
pub struct MiniStore {
    table: AllocationTable,
    /// First big block of the mini stream, or `ENDOFCHAIN`
    stream_start: u32,
    /// Big blocks of the mini stream, in order
    stream_chain: Vec<u32>,
    /// Set by any allocation or release since the last load or flush
    modified: bool,
}

impl MiniStore {
    /// An empty mini store with no mini-FAT and no mini stream.
    pub fn new(bat: &BlockAllocationTable) -> Self {
        Self {
            table: AllocationTable::new(bat.geometry().bat_entries_per_block()),
            stream_start: ENDOFCHAIN,
            stream_chain: Vec::new(),
            modified: false,
        }
    }

    /// Load the mini-FAT named by `header` and the mini stream starting at
    /// `root_start`.
    pub fn load(header: &HeaderBlock, bat: &BlockAllocationTable, root_start: u32) -> Result<Self> {
        let mut store = Self::new(bat);

        let sbat_blocks = if header.sbat_start() == ENDOFCHAIN {
            Vec::new()
        } else {
            bat.chain(header.sbat_start())?
        };
        if sbat_blocks.len() != header.sbat_count() as usize {
            return Err(Error::InvalidFormat(format!(
                "header declares {} mini-FAT blocks, chain holds {}",
                header.sbat_count(),
                sbat_blocks.len()
            )));
        }
        for location in sbat_blocks {
            store
                .table
                .push_block_bytes(location, bat.read_block(location)?);
        }

        if root_start != ENDOFCHAIN {
            store.stream_chain = bat.chain(root_start)?;
            store.stream_start = root_start;
        }

        Ok(store)
    }

    /// The mini-FAT next-pointer table.
    pub fn table(&self) -> &AllocationTable {
        &self.table
    }

    pub fn next_of(&self, index: u32) -> Result<u32> {
        self.table.next_of(index)
    }

    /// Mini-sectors of the chain starting at `start`.
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        self.table.chain(start)
    }

    /// Resolve the mini-FAT block and offset backing mini-sector `index`.
    pub fn locate(&self, index: u32) -> Result<BlockAndIndex<'_>> {
        self.table.locate(index)
    }

    /// Number of mini-FAT blocks.
    pub fn sbat_count(&self) -> usize {
        self.table.block_count()
    }

    /// First big block of the mini stream, or `ENDOFCHAIN`.
    pub fn stream_start(&self) -> u32 {
        self.stream_start
    }

    /// Big blocks holding the mini stream.
    pub fn stream_chain(&self) -> &[u32] {
        &self.stream_chain
    }

    /// Bytes of mini stream in use: up to the end of the last allocated mini-sector.
    pub fn stream_size(&self) -> u64 {
        self.table
            .last_used()
            .map_or(0, |last| (last as u64 + 1) * MINI_SECTOR_SIZE as u64)
    }

    /// Big block and byte offset holding mini-sector `index`.
    pub fn sector_position(&self, block_size: usize, index: u32) -> Result<(u32, usize)> {
        let position = index as usize * MINI_SECTOR_SIZE;
        let block = self
            .stream_chain
            .get(position / block_size)
            .copied()
            .ok_or_else(|| {
                Error::CorruptedFile(format!(
                    "mini-sector {} lies beyond the mini stream ({} blocks)",
                    index,
                    self.stream_chain.len()
                ))
            })?;
        Ok((block, position % block_size))
    }

    /// Contents of mini-sector `index`.
    pub fn sector<'a>(&self, bat: &'a BlockAllocationTable, index: u32) -> Result<&'a [u8]> {
        let (block, offset) = self.sector_position(bat.block_size(), index)?;
        let data = bat.read_block(block)?;
        Ok(&data[offset..offset + MINI_SECTOR_SIZE])
    }

    /// Whether anything was allocated or released since the last load or flush.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Write the mini-FAT into its host blocks and record it in `header`.
    ///
    /// If the store was modified, the mini stream is also trimmed to the
    /// sectors in use and the new start and size for the root entry are
    /// returned. An untouched store returns `None` and the root keeps its
    /// decoded start and size.
    pub(crate) fn flush(
        &mut self,
        bat: &mut BlockAllocationTable,
        header: &mut HeaderBlock,
    ) -> Result<Option<(u32, u64)>> {
        for block in self.table.blocks() {
            block.write_into(bat.write_block(block.location())?);
        }
        let locations = self.table.locations();
        let sbat_start = locations.first().copied().unwrap_or(ENDOFCHAIN);
        header.set_sbat(sbat_start, locations.len() as u32);

        if !self.modified {
            return Ok(None);
        }
        self.modified = false;

        let size = self.stream_size();
        let needed = (size as usize).div_ceil(bat.block_size());
        if needed != self.stream_chain.len() {
            self.stream_start = bat.resize_chain(self.stream_start, needed)?;
            self.stream_chain = if self.stream_start == ENDOFCHAIN {
                Vec::new()
            } else {
                bat.chain(self.stream_start)?
            };
        }

        log::debug!(
            "mini store: {} mini-FAT blocks, {} byte stream in {} blocks",
            locations.len(),
            size,
            self.stream_chain.len()
        );
        Ok(Some((self.stream_start, size)))
    }
}

/// Allocator over mini-sectors, borrowing the mini store and the BAT.
pub struct MiniAllocator<'a> {
    mini: &'a mut MiniStore,
    bat: &'a mut BlockAllocationTable,
}

impl<'a> MiniAllocator<'a> {
    pub fn new(mini: &'a mut MiniStore, bat: &'a mut BlockAllocationTable) -> Self {
        Self { mini, bat }
    }

    pub fn mini_store(&self) -> &MiniStore {
        &*self.mini
    }

    /// Append one big block to the mini-FAT chain.
    fn extend(&mut self) -> Result<u32> {
        let host = self.bat.find_free_block()?;
        self.bat.set_next(host, ENDOFCHAIN)?;
        if let Some(&last) = self.mini.table.locations().last() {
            self.bat.set_next(last, host)?;
        }
        // New table blocks start out all free on disk as well
        self.bat.write_block(host)?.fill(0xFF);

        let first = self.mini.table.push_free_block(host);
        self.mini.modified = true;
        log::trace!(
            "added mini-FAT block {} (mini-FAT count {})",
            host,
            self.mini.table.block_count()
        );
        Ok(first)
    }

    /// Grow the mini stream until it holds mini-sector `index`.
    fn ensure_stream(&mut self, index: u32) -> Result<()> {
        let block_size = self.bat.block_size();
        let needed = index as usize * MINI_SECTOR_SIZE / block_size + 1;
        while self.mini.stream_chain.len() < needed {
            let block = self.bat.find_free_block()?;
            self.bat.set_next(block, ENDOFCHAIN)?;
            match self.mini.stream_chain.last() {
                Some(&last) => self.bat.set_next(last, block)?,
                None => self.mini.stream_start = block,
            }
            self.bat.write_block(block)?.fill(0);
            self.mini.stream_chain.push(block);
            self.mini.modified = true;
        }
        Ok(())
    }
}

impl BlockAllocator for MiniAllocator<'_> {
    fn block_size(&self) -> usize {
        MINI_SECTOR_SIZE
    }

    fn next_of(&self, index: u32) -> Result<u32> {
        self.mini.table.next_of(index)
    }

    fn set_next(&mut self, index: u32, next: u32) -> Result<()> {
        self.mini.table.set_next(index, next)?;
        self.mini.modified = true;
        Ok(())
    }

    fn find_free_block(&mut self) -> Result<u32> {
        match self.mini.table.first_free() {
            Some(free) => Ok(free),
            None => self.extend(),
        }
    }

    fn read_block(&self, index: u32) -> Result<&[u8]> {
        self.mini.sector(&*self.bat, index)
    }

    fn write_block(&mut self, index: u32) -> Result<&mut [u8]> {
        self.ensure_stream(index)?;
        let (block, offset) = self.mini.sector_position(self.bat.block_size(), index)?;
        let data = self.bat.write_block(block)?;
        Ok(&mut data[offset..offset + MINI_SECTOR_SIZE])
    }
}
