//! Compound file façade: open, navigate, modify and write a CFBF container.
//!
//! # Architecture
//!
//! Everything lives in memory. Opening a file decodes the header, the BAT
//! and XBAT, the property table and the mini store, and validates every
//! chain reachable from them; a file either opens completely or not at all.
//! Mutations update the tables and the block store in place. Nothing is
//! persisted until [`write`](OleFileSystem::write), which re-serializes the
//! whole structure:
//!
//! 1. pending push-writers are run and their output stored
//! 2. the mini-FAT is flushed and the mini stream trimmed to the sectors in use
//! 3. the property table is re-encoded into its chain
//! 4. the BAT and XBAT blocks are written and recorded in the header
//! 5. the header block is emitted, followed by every block in index order
//!
//! Documents below 4096 bytes live in the mini store; larger ones use the
//! BAT directly.
//!
//! # Example
//!
//! ```rust
//! use std::io::Read;
//! use olestore::ole::OleFileSystem;
//!
//! let mut fs = OleFileSystem::create();
//! let root = fs.root();
//! let storage = fs.create_storage(root, "Pictures")?;
//! fs.create_document(storage, "Thumbnail", &[0xAB; 300])?;
//! let bytes = fs.to_bytes()?;
//!
//! let reopened = OleFileSystem::open(&bytes)?;
//! let thumb = reopened.entry_by_path(&["Pictures", "Thumbnail"])?;
//! let mut data = Vec::new();
//! reopened.create_document_input_stream(thumb)?.read_to_end(&mut data)?;
//! assert_eq!(data, vec![0xAB; 300]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use super::alloc::{BlockAllocator, BlockAndIndex};
use super::bat::BlockAllocationTable;
use super::block_store::BlockStore;
use super::consts::*;
use super::document::{DocumentInputStream, DocumentSink, DocumentWriter};
use super::header::HeaderBlock;
use super::mini_store::{MiniAllocator, MiniStore};
use super::options::{BlockSize, OleOptions};
use super::property::{EntryId, Property, PropertyTable};
use crate::common::error::{Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

/// Content waiting for its push-writer to run.
struct PendingDocument {
    id: EntryId,
    size: u64,
    writer: DocumentWriter,
}

/// An in-memory compound file.
pub struct OleFileSystem {
    header: HeaderBlock,
    bat: BlockAllocationTable,
    mini: MiniStore,
    properties: PropertyTable,
    pending: Vec<PendingDocument>,
}

impl OleFileSystem {
    /// Create an empty filesystem with 512-byte blocks.
    pub fn create() -> Self {
        Self::create_with(OleOptions::default())
    }

    /// Create an empty filesystem: one BAT block at block 0, an empty root
    /// and no mini stream.
    ///
    /// # Example
    ///
    /// ```rust
    /// use olestore::ole::{BlockSize, OleFileSystem, OleOptions};
    ///
    /// let fs = OleFileSystem::create_with(OleOptions::new().with_block_size(BlockSize::Large));
    /// assert_eq!(fs.big_block_size(), 4096);
    /// ```
    pub fn create_with(options: OleOptions) -> Self {
        let bat = BlockAllocationTable::create(options.block_size);
        let mini = MiniStore::new(&bat);
        Self {
            header: HeaderBlock::new(options.block_size),
            bat,
            mini,
            properties: PropertyTable::new(),
            pending: Vec::new(),
        }
    }

    /// Decode a compound file from its bytes.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidFormat`] for a bad signature, unsupported geometry or
    ///   inconsistent header counts
    /// * [`Error::CorruptedFile`] for truncated input or chains that loop or
    ///   leave their table
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let header = HeaderBlock::from_bytes(bytes)?;
        let block_size = header.block_size().bytes();
        if bytes.len() < block_size {
            return Err(Error::CorruptedFile(format!(
                "file of {} bytes is shorter than its {} byte header block",
                bytes.len(),
                block_size
            )));
        }

        let store = BlockStore::from_bytes(header.block_size(), &bytes[block_size..]);
        let bat = BlockAllocationTable::load(&header, store)?;
        let properties = PropertyTable::load(&bat, header.property_start())?;
        let root_start = properties.entry(properties.root())?.start_block();
        let mini = MiniStore::load(&header, &bat, root_start)?;

        let fs = Self {
            header,
            bat,
            mini,
            properties,
            pending: Vec::new(),
        };
        fs.validate_documents()?;

        log::debug!(
            "opened compound file: {} byte blocks, {} blocks, {} entries",
            block_size,
            fs.bat.store().block_count(),
            fs.properties.len()
        );
        Ok(fs)
    }

    /// Read all bytes from `reader` and decode them.
    pub fn open_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::open(&bytes)
    }

    /// Open the compound file at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::open(&bytes)
    }

    /// Check that every document's chain covers its declared size.
    fn validate_documents(&self) -> Result<()> {
        for (id, entry) in self.properties.iter() {
            if entry.is_document() {
                self.document_segments(id, entry)?;
            }
        }
        Ok(())
    }

    /// The root directory entry.
    pub fn root(&self) -> EntryId {
        self.properties.root()
    }

    /// Look up an entry.
    pub fn entry(&self, id: EntryId) -> Result<&Property> {
        self.properties.entry(id)
    }

    /// Children of a directory, in order.
    pub fn children(&self, id: EntryId) -> Result<&[EntryId]> {
        self.properties.children(id)
    }

    /// Find a child of `parent` by name, ignoring case.
    pub fn child_by_name(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.properties.child_by_name(parent, name)
    }

    /// Resolve a path of names starting at the root.
    ///
    /// An empty path names the root.
    pub fn entry_by_path(&self, path: &[&str]) -> Result<EntryId> {
        let mut current = self.root();
        for name in path {
            current = self.child_by_name(current, name)?;
        }
        Ok(current)
    }

    /// Create an empty storage under `parent`.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a directory, the name is invalid, or a
    /// sibling already has the name.
    pub fn create_storage(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.properties.create_storage(parent, name)
    }

    /// Create a document under `parent` holding `data`.
    ///
    /// # Arguments
    ///
    /// * `parent` - Directory to add the document to
    /// * `name` - Document name, at most 31 UTF-16 units
    /// * `data` - Document contents
    pub fn create_document(&mut self, parent: EntryId, name: &str, data: &[u8]) -> Result<EntryId> {
        let id = self.properties.create_stream(parent, name, ENDOFCHAIN, 0)?;
        let start = self.store_content(data)?;
        self.properties
            .entry_mut(id)?
            .set_start_and_size(start, data.len() as u64);
        Ok(id)
    }

    /// Create a document whose `size` bytes are produced by `writer` when
    /// the filesystem is written.
    ///
    /// The entry reads as empty until then.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Write;
    /// use olestore::ole::OleFileSystem;
    ///
    /// let mut fs = OleFileSystem::create();
    /// let root = fs.root();
    /// fs.create_document_with_writer(root, "Numbers", 10, |sink| sink.write_all(b"0123456789"))?;
    /// let reopened = OleFileSystem::open(&fs.to_bytes()?)?;
    /// let numbers = reopened.child_by_name(reopened.root(), "Numbers")?;
    /// assert_eq!(reopened.entry(numbers)?.size(), 10);
    /// # Ok::<(), olestore::common::Error>(())
    /// ```
    pub fn create_document_with_writer<F>(
        &mut self,
        parent: EntryId,
        name: &str,
        size: u64,
        writer: F,
    ) -> Result<EntryId>
    where
        F: FnMut(&mut DocumentSink) -> io::Result<()> + 'static,
    {
        let id = self.properties.create_stream(parent, name, ENDOFCHAIN, 0)?;
        self.pending.push(PendingDocument {
            id,
            size,
            writer: Box::new(writer),
        });
        Ok(id)
    }

    /// Replace the contents of an existing document.
    pub fn replace_document(&mut self, id: EntryId, data: &[u8]) -> Result<()> {
        let entry = self.properties.entry(id)?;
        if !entry.is_document() {
            return Err(Error::NotADocument(entry.name().to_string()));
        }
        let (old_start, old_size) = (entry.start_block(), entry.size());

        self.release_content(old_start, old_size)?;
        self.pending.retain(|pending| pending.id != id);
        let start = self.store_content(data)?;
        self.properties
            .entry_mut(id)?
            .set_start_and_size(start, data.len() as u64);
        Ok(())
    }

    /// Remove an entry, and for a storage everything below it, releasing
    /// the blocks of every removed document.
    pub fn remove_entry(&mut self, id: EntryId) -> Result<()> {
        for (removed_id, removed) in self.properties.remove(id)? {
            if removed.is_document() {
                self.release_content(removed.start_block(), removed.size())?;
            }
            self.pending.retain(|pending| pending.id != removed_id);
        }
        Ok(())
    }

    /// Set the class id of a storage or of the root.
    pub fn set_storage_clsid(&mut self, id: EntryId, clsid: [u8; 16]) -> Result<()> {
        let entry = self.properties.entry_mut(id)?;
        if !entry.is_directory() {
            return Err(Error::NotAStorage(entry.name().to_string()));
        }
        entry.set_clsid(clsid);
        Ok(())
    }

    /// Open a read cursor over a document.
    pub fn create_document_input_stream(&self, id: EntryId) -> Result<DocumentInputStream<'_>> {
        let entry = self.properties.entry(id)?;
        if !entry.is_document() {
            return Err(Error::NotADocument(entry.name().to_string()));
        }
        let segments = self.document_segments(id, entry)?;
        Ok(DocumentInputStream::new(segments, entry.size()))
    }

    /// Open a read cursor over the document `name` in `parent`.
    pub fn create_document_input_stream_by_name(
        &self,
        parent: EntryId,
        name: &str,
    ) -> Result<DocumentInputStream<'_>> {
        let id = self.child_by_name(parent, name)?;
        self.create_document_input_stream(id)
    }

    /// Read a whole document into memory.
    pub fn read_document(&self, id: EntryId) -> Result<Vec<u8>> {
        let mut stream = self.create_document_input_stream(id)?;
        let mut data = Vec::with_capacity(stream.size() as usize);
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Slices of the blocks holding a document, in chain order.
    fn document_segments(&self, id: EntryId, entry: &Property) -> Result<Vec<&[u8]>> {
        let size = entry.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let (segments, granularity) = if entry.is_small() {
            let sectors = self.mini.chain(entry.start_block())?;
            let segments = sectors
                .into_iter()
                .map(|sector| self.mini.sector(&self.bat, sector))
                .collect::<Result<Vec<_>>>()?;
            (segments, MINI_SECTOR_SIZE)
        } else {
            let blocks = self.bat.chain(entry.start_block())?;
            let segments = blocks
                .into_iter()
                .map(|block| self.bat.read_block(block))
                .collect::<Result<Vec<_>>>()?;
            (segments, self.bat.block_size())
        };

        let capacity = (segments.len() * granularity) as u64;
        if capacity < size {
            return Err(Error::CorruptedFile(format!(
                "document '{}' (entry #{}) declares {} bytes but its chain holds {}",
                entry.name(),
                id.index(),
                size,
                capacity
            )));
        }
        Ok(segments)
    }

    /// Store `data` in a fresh chain of the allocator its size calls for.
    fn store_content(&mut self, data: &[u8]) -> Result<u32> {
        if data.is_empty() {
            return Ok(ENDOFCHAIN);
        }
        if data.len() < MINI_STREAM_CUTOFF as usize {
            MiniAllocator::new(&mut self.mini, &mut self.bat).write_chain(ENDOFCHAIN, data)
        } else {
            self.bat.write_chain(ENDOFCHAIN, data)
        }
    }

    /// Release the chain of a document of `size` bytes.
    fn release_content(&mut self, start: u32, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if size < MINI_STREAM_CUTOFF as u64 {
            MiniAllocator::new(&mut self.mini, &mut self.bat).free_chain(start)
        } else {
            self.bat.free_chain(start)
        }
    }

    /// Run every pending push-writer and store its output.
    ///
    /// Nothing changes unless all writers succeed with their declared sizes.
    fn materialize_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut outputs = Vec::with_capacity(self.pending.len());
        for pending in self.pending.iter_mut() {
            let mut sink = DocumentSink::with_capacity(pending.size as usize);
            (pending.writer)(&mut sink)?;
            if sink.written() != pending.size {
                return Err(Error::SizeMismatch {
                    expected: pending.size,
                    actual: sink.written(),
                });
            }
            outputs.push(sink.into_inner());
        }

        for (pending, data) in std::mem::take(&mut self.pending).into_iter().zip(outputs) {
            let start = self.store_content(&data)?;
            self.properties
                .entry_mut(pending.id)?
                .set_start_and_size(start, data.len() as u64);
        }
        Ok(())
    }

    /// Bring the header, tables and property chain up to date with the tree.
    fn sync(&mut self) -> Result<()> {
        self.materialize_pending()?;

        if let Some((mini_start, mini_size)) = self.mini.flush(&mut self.bat, &mut self.header)? {
            let root = self.properties.root();
            self.properties
                .entry_mut(root)?
                .set_start_and_size(mini_start, mini_size);
        }

        self.properties.flush(&mut self.bat, &mut self.header)?;
        self.bat.flush(&mut self.header);
        Ok(())
    }

    /// Serialize the whole filesystem to `out`.
    ///
    /// A failure while running push-writers leaves the filesystem unchanged;
    /// a failure while writing leaves `out` partially written.
    pub fn write<W: Write>(&mut self, out: &mut W) -> Result<()> {
        self.sync()?;
        out.write_all(&self.header.to_block())?;
        out.write_all(self.bat.store().as_bytes())?;
        out.flush()?;

        log::debug!(
            "wrote compound file: {} blocks, {} BAT blocks, {} XBAT blocks, {} entries",
            self.bat.store().block_count(),
            self.bat.bat_count(),
            self.bat.xbat_count(),
            self.properties.len()
        );
        Ok(())
    }

    /// Serialize the whole filesystem into a byte vector.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size() as usize);
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    /// Serialize the whole filesystem to the file at `path`.
    pub fn write_to_path<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut buffered = io::BufWriter::new(file);
        self.write(&mut buffered)?;
        Ok(())
    }

    /// Raw contents of big block `index`.
    pub fn block_at(&self, index: u32) -> Result<&[u8]> {
        self.bat.read_block(index)
    }

    /// BAT entry of block `index`.
    pub fn next_block(&self, index: u32) -> Result<u32> {
        self.bat.next_of(index)
    }

    /// Overwrite the BAT entry of block `index`.
    pub fn set_next_block(&mut self, index: u32, next: u32) -> Result<()> {
        self.bat.set_next(index, next)
    }

    /// First free big block, extending the BAT if none is left.
    ///
    /// The block is not marked as used.
    pub fn free_block(&mut self) -> Result<u32> {
        self.bat.find_free_block()
    }

    /// BAT block and offset holding the entry of block `index`.
    pub fn bat_block_and_index(&self, index: u32) -> Result<BlockAndIndex<'_>> {
        self.bat.locate(index)
    }

    pub fn bat(&self) -> &BlockAllocationTable {
        &self.bat
    }

    pub fn mini_store(&self) -> &MiniStore {
        &self.mini
    }

    /// Allocator over mini-sectors, borrowing the filesystem mutably.
    pub fn mini_allocator(&mut self) -> MiniAllocator<'_> {
        MiniAllocator::new(&mut self.mini, &mut self.bat)
    }

    pub fn property_table(&self) -> &PropertyTable {
        &self.properties
    }

    /// The header as decoded or as last written.
    pub fn header(&self) -> &HeaderBlock {
        &self.header
    }

    pub fn block_size(&self) -> BlockSize {
        self.bat.geometry()
    }

    /// Size of the big blocks in bytes.
    pub fn big_block_size(&self) -> usize {
        self.bat.block_size()
    }

    /// Size in bytes of the file as it currently stands, header included.
    pub fn size(&self) -> u64 {
        (self.bat.store().block_count() as u64 + 1) * self.big_block_size() as u64
    }

    /// Release the filesystem.
    pub fn close(self) {}
}

impl Default for OleFileSystem {
    fn default() -> Self {
        Self::create()
    }
}

impl fmt::Debug for OleFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OleFileSystem")
            .field("block_size", &self.big_block_size())
            .field("blocks", &self.bat.store().block_count())
            .field("entries", &self.properties.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
