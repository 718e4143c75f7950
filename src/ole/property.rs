//! Property table: the directory tree of storages and streams.
//!
//! On disk every entry is a 128-byte record in the property chain, and each
//! directory's children are a binary tree linked through left/right sibling
//! pointers. In memory the entries live in an arena addressed by
//! [`EntryId`]; every directory keeps its children as an ordered list.
//!
//! # Child order
//!
//! Children are collected with a stack walk starting at the directory's
//! child link: pop a record, append it, descend into its own children, then
//! push its left link followed by its right link (so the right link is
//! popped first). Encoding writes each directory's children as a chain of
//! right links in list order, which decodes back to the same order.

use super::alloc::BlockAllocator;
use super::bat::BlockAllocationTable;
use super::consts::*;
use super::header::HeaderBlock;
use crate::common::binary::{parse_utf16le_string_len, write_u16_le, write_u32_le, write_u64_le};
use crate::common::error::{Error, Result};
use fixedbitset::FixedBitSet;
use zerocopy::{FromBytes, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

/// Raw property record (128 bytes).
#[derive(Debug, Clone, DeriveFromBytes)]
#[repr(C)]
struct RawProperty {
    /// Name in UTF-16LE, null-padded
    name: [u8; 64],
    /// Name length in bytes, including the terminator
    name_len: U16<LE>,
    entry_type: u8,
    node_color: u8,
    left: U32<LE>,
    right: U32<LE>,
    child: U32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    created: U64<LE>,
    modified: U64<LE>,
    start: U32<LE>,
    size: U64<LE>,
}

impl RawProperty {
    fn name(&self) -> String {
        let units = (self.name_len.get() as usize / 2)
            .saturating_sub(1)
            .min(MAX_NAME_UNITS + 1);
        parse_utf16le_string_len(&self.name, 0, units)
            .trim_end_matches('\0')
            .to_string()
    }
}

/// Handle to an entry in a [`PropertyTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl EntryId {
    /// Position of the entry in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// What an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Root,
    Storage,
    Stream,
}

impl EntryKind {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            STGTY_ROOT => Some(Self::Root),
            STGTY_STORAGE => Some(Self::Storage),
            STGTY_STREAM => Some(Self::Stream),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Root => STGTY_ROOT,
            Self::Storage => STGTY_STORAGE,
            Self::Stream => STGTY_STREAM,
        }
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    kind: EntryKind,
    size: u64,
    start: u32,
    clsid: [u8; 16],
    state_bits: u32,
    created: u64,
    modified: u64,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
}

impl Property {
    fn new(name: String, kind: EntryKind, parent: Option<EntryId>) -> Self {
        Self {
            name,
            kind,
            size: 0,
            start: match kind {
                EntryKind::Storage => 0,
                _ => ENDOFCHAIN,
            },
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            parent,
            children: Vec::new(),
        }
    }

    fn from_raw(raw: &RawProperty, kind: EntryKind, parent: Option<EntryId>, block_size: usize) -> Self {
        // 512-byte block files only define the low 32 bits of the size
        let size = if block_size == SECTOR_SIZE_V3 {
            raw.size.get() & 0xFFFF_FFFF
        } else {
            raw.size.get()
        };
        Self {
            name: raw.name(),
            kind,
            size,
            start: raw.start.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            created: raw.created.get(),
            modified: raw.modified.get(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Whether this entry can hold children (root or storage).
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Root | EntryKind::Storage)
    }

    pub fn is_document(&self) -> bool {
        self.kind == EntryKind::Stream
    }

    /// Stream size in bytes; for the root, the size of the mini stream.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// First block of the entry's chain.
    pub fn start_block(&self) -> u32 {
        self.start
    }

    /// Whether a stream of this size lives in the mini store.
    pub fn is_small(&self) -> bool {
        self.is_document() && self.size < MINI_STREAM_CUTOFF as u64
    }

    pub fn clsid(&self) -> &[u8; 16] {
        &self.clsid
    }

    /// CLSID in registry format, or an empty string when unset.
    pub fn clsid_string(&self) -> String {
        let b = &self.clsid;
        if b.iter().all(|&x| x == 0) {
            return String::new();
        }
        format!(
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15],
        )
    }

    pub fn state_bits(&self) -> u32 {
        self.state_bits
    }

    /// Creation time as a raw FILETIME.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Modification time as a raw FILETIME.
    pub fn modified(&self) -> u64 {
        self.modified
    }

    /// Parent directory; `None` only for the root.
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Children in directory order.
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub(crate) fn set_start_and_size(&mut self, start: u32, size: u64) {
        self.start = start;
        self.size = size;
    }

    pub(crate) fn set_clsid(&mut self, clsid: [u8; 16]) {
        self.clsid = clsid;
    }

    fn encode_into(&self, data: &mut [u8], right: u32, child: u32) {
        let units: Vec<u16> = self.name.encode_utf16().take(MAX_NAME_UNITS).collect();
        for (i, unit) in units.iter().enumerate() {
            write_u16_le(data, i * 2, *unit);
        }
        let name_len = if units.is_empty() { 0 } else { (units.len() + 1) * 2 };
        write_u16_le(data, 64, name_len as u16);
        data[66] = self.kind.to_raw();
        data[67] = NODE_BLACK;
        write_u32_le(data, 68, NOSTREAM);
        write_u32_le(data, 72, right);
        write_u32_le(data, 76, child);
        data[80..96].copy_from_slice(&self.clsid);
        write_u32_le(data, 96, self.state_bits);
        write_u64_le(data, 100, self.created);
        write_u64_le(data, 108, self.modified);
        write_u32_le(data, 116, self.start);
        write_u64_le(data, 120, self.size);
    }
}

/// Encode an unused record.
fn encode_empty(data: &mut [u8]) {
    data.fill(0);
    write_u32_le(data, 68, NOSTREAM);
    write_u32_le(data, 72, NOSTREAM);
    write_u32_le(data, 76, NOSTREAM);
}

/// Check a new entry name: non-empty, at most 31 UTF-16 units, no separators.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("entry names cannot be empty".to_string()));
    }
    let units = name.encode_utf16().count();
    if units > MAX_NAME_UNITS {
        return Err(Error::InvalidName(format!(
            "'{}' is {} UTF-16 units long, at most {} allowed",
            name, units, MAX_NAME_UNITS
        )));
    }
    if name.contains(['/', '\\', ':', '!']) {
        return Err(Error::InvalidName(format!(
            "'{}' contains a reserved character",
            name
        )));
    }
    Ok(())
}

/// The decoded directory tree plus the location of its chain.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    entries: Vec<Option<Property>>,
    /// Empty arena slots, highest first so the lowest is reused first
    free_slots: Vec<usize>,
    root: EntryId,
    start_block: u32,
    block_count: usize,
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyTable {
    /// A table holding only an empty root entry, not yet stored anywhere.
    pub fn new() -> Self {
        Self {
            entries: vec![Some(Property::new(
                ROOT_ENTRY_NAME.to_string(),
                EntryKind::Root,
                None,
            ))],
            free_slots: Vec::new(),
            root: EntryId(0),
            start_block: ENDOFCHAIN,
            block_count: 0,
        }
    }

    /// Decode the property chain starting at `start`.
    ///
    /// Record `n` of the chain becomes arena slot `n`; unreachable records
    /// are dropped.
    pub fn load(bat: &BlockAllocationTable, start: u32) -> Result<Self> {
        let blocks = bat.chain(start)?;
        if blocks.is_empty() {
            return Err(Error::CorruptedFile("property table is empty".to_string()));
        }
        let mut data = Vec::with_capacity(blocks.len() * bat.block_size());
        for &block in &blocks {
            data.extend_from_slice(bat.read_block(block)?);
        }

        let raws: Vec<RawProperty> = data
            .chunks_exact(DIRENTRY_SIZE)
            .map(|chunk| {
                RawProperty::read_from_bytes(chunk).map_err(|_| {
                    Error::InvalidFormat("failed to parse property record".to_string())
                })
            })
            .collect::<Result<_>>()?;

        let root_raw = &raws[0];
        if root_raw.entry_type != STGTY_ROOT {
            return Err(Error::InvalidFormat(format!(
                "first property record has type {}, expected the root",
                root_raw.entry_type
            )));
        }

        let mut table = Self {
            entries: vec![None; raws.len()],
            free_slots: Vec::new(),
            root: EntryId(0),
            start_block: start,
            block_count: blocks.len(),
        };
        table.entries[0] = Some(Property::from_raw(
            root_raw,
            EntryKind::Root,
            None,
            bat.block_size(),
        ));

        let mut visited = FixedBitSet::with_capacity(raws.len());
        visited.insert(0);
        table.decode_children(&raws, EntryId(0), root_raw.child.get(), &mut visited, bat.block_size())?;

        table.free_slots = (0..table.entries.len())
            .rev()
            .filter(|&slot| table.entries[slot].is_none())
            .collect();

        let live = table.len();
        let used = raws
            .iter()
            .filter(|raw| raw.entry_type != STGTY_EMPTY)
            .count();
        if used != live {
            log::warn!(
                "{} property records are not reachable from the root",
                used - live
            );
        }
        log::debug!(
            "decoded {} properties from {} blocks starting at {}",
            live,
            blocks.len(),
            start
        );
        Ok(table)
    }

    /// Attach every record reachable from `first` below `parent`.
    ///
    /// Frames are `(parent, sid)` pairs on an explicit stack, so nesting
    /// depth does not grow the call stack. A storage's own child frame goes
    /// on top of its siblings, so its subtree is walked before them.
    fn decode_children(
        &mut self,
        raws: &[RawProperty],
        parent: EntryId,
        first: u32,
        visited: &mut FixedBitSet,
        block_size: usize,
    ) -> Result<()> {
        let mut stack = vec![(parent, first)];

        while let Some((parent, sid)) = stack.pop() {
            if sid == NOSTREAM {
                continue;
            }
            let raw = raws.get(sid as usize).ok_or_else(|| {
                Error::CorruptedFile(format!(
                    "property link {} is outside the table ({} records)",
                    sid,
                    raws.len()
                ))
            })?;
            if visited.put(sid as usize) {
                return Err(Error::CorruptedFile(format!(
                    "property tree loops back to record {}",
                    sid
                )));
            }

            let kind = match EntryKind::from_raw(raw.entry_type) {
                Some(EntryKind::Root) | None => {
                    return Err(Error::CorruptedFile(format!(
                        "property record {} has unexpected type {}",
                        sid, raw.entry_type
                    )));
                },
                Some(kind) => kind,
            };

            let id = EntryId(sid as usize);
            self.entries[id.0] = Some(Property::from_raw(raw, kind, Some(parent), block_size));
            if let Some(parent) = self.entries[parent.0].as_mut() {
                parent.children.push(id);
            }

            stack.push((parent, raw.left.get()));
            stack.push((parent, raw.right.get()));
            if kind == EntryKind::Storage {
                stack.push((id, raw.child.get()));
            }
        }

        Ok(())
    }

    /// The root entry.
    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Look up a live entry.
    pub fn get(&self, id: EntryId) -> Option<&Property> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    /// Look up a live entry, failing with a not-found error.
    pub fn entry(&self, id: EntryId) -> Result<&Property> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("entry #{}", id.0)))
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Result<&mut Property> {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NotFound(format!("entry #{}", id.0)))
    }

    /// Children of a directory, in order.
    pub fn children(&self, id: EntryId) -> Result<&[EntryId]> {
        let entry = self.entry(id)?;
        if !entry.is_directory() {
            return Err(Error::NotAStorage(entry.name.clone()));
        }
        Ok(&entry.children)
    }

    /// Find a child by name, comparing upper-cased names.
    pub fn child_by_name(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        let wanted = name.to_uppercase();
        self.children(parent)?
            .iter()
            .copied()
            .find(|&child| {
                self.get(child)
                    .is_some_and(|entry| entry.name.to_uppercase() == wanted)
            })
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Number of live entries, root included.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries with their ids, in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Property)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_ref().map(|entry| (EntryId(i), entry)))
    }

    /// First block of the property chain, or `ENDOFCHAIN` before the first write.
    pub fn start_block(&self) -> u32 {
        self.start_block
    }

    /// Number of blocks in the property chain.
    pub fn count_blocks(&self) -> usize {
        self.block_count
    }

    /// Append a new storage to `parent`.
    pub fn create_storage(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.insert(parent, Property::new(name.to_string(), EntryKind::Storage, Some(parent)))
    }

    /// Append a new stream to `parent`, stored at `start` with `size` bytes.
    pub fn create_stream(&mut self, parent: EntryId, name: &str, start: u32, size: u64) -> Result<EntryId> {
        let mut property = Property::new(name.to_string(), EntryKind::Stream, Some(parent));
        property.set_start_and_size(start, size);
        self.insert(parent, property)
    }

    fn insert(&mut self, parent: EntryId, property: Property) -> Result<EntryId> {
        validate_name(&property.name)?;
        match self.child_by_name(parent, &property.name) {
            Ok(_) => return Err(Error::AlreadyExists(property.name)),
            Err(Error::NotFound(_)) => {},
            Err(e) => return Err(e),
        }

        let id = match self.free_slots.pop() {
            Some(free) => EntryId(free),
            None => {
                self.entries.push(None);
                EntryId(self.entries.len() - 1)
            },
        };
        self.entries[id.0] = Some(property);
        self.entry_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Remove an entry and everything below it.
    ///
    /// Returns the removed entries so the caller can release their chains.
    pub fn remove(&mut self, id: EntryId) -> Result<Vec<(EntryId, Property)>> {
        if id == self.root {
            return Err(Error::InvalidName(
                "the root entry cannot be removed".to_string(),
            ));
        }
        let parent = self.entry(id)?.parent;
        if let Some(parent) = parent {
            self.entry_mut(parent)?.children.retain(|&child| child != id);
        }

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.entries.get_mut(next.0).and_then(Option::take) {
                pending.extend_from_slice(&entry.children);
                self.free_slots.push(next.0);
                removed.push((next, entry));
            }
        }
        self.free_slots.sort_unstable_by(|a, b| b.cmp(a));
        Ok(removed)
    }

    /// Live entries in pre-order: each directory before its children.
    pub fn preorder(&self) -> Vec<EntryId> {
        let mut order = Vec::with_capacity(self.entries.len());
        let mut pending = vec![self.root];
        while let Some(id) = pending.pop() {
            order.push(id);
            if let Some(entry) = self.get(id) {
                pending.extend(entry.children.iter().rev());
            }
        }
        order
    }

    /// Encode the tree as property records padded to whole `block_size` blocks.
    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let order = self.preorder();
        let mut sids = vec![NOSTREAM; self.entries.len()];
        for (sid, id) in order.iter().enumerate() {
            sids[id.0] = sid as u32;
        }

        let per_block = block_size / DIRENTRY_SIZE;
        let records = order.len().div_ceil(per_block) * per_block;
        let mut data = vec![0u8; records * DIRENTRY_SIZE];

        for (record, chunk) in data.chunks_exact_mut(DIRENTRY_SIZE).enumerate() {
            let Some(entry) = order.get(record).and_then(|&id| self.get(id)) else {
                encode_empty(chunk);
                continue;
            };

            let child = entry
                .children
                .first()
                .map_or(NOSTREAM, |first| sids[first.0]);
            let right = entry
                .parent
                .and_then(|parent| self.get(parent))
                .and_then(|parent| {
                    let siblings = &parent.children;
                    let position = siblings.iter().position(|&c| c == order[record])?;
                    siblings.get(position + 1)
                })
                .map_or(NOSTREAM, |next| sids[next.0]);

            entry.encode_into(chunk, right, child);
        }

        data
    }

    /// Write the encoded tree to its chain and record it in `header`.
    ///
    /// The chain grows as needed but keeps at least the number of blocks it
    /// was decoded from.
    pub(crate) fn flush(
        &mut self,
        bat: &mut BlockAllocationTable,
        header: &mut HeaderBlock,
    ) -> Result<()> {
        let block_size = bat.block_size();
        let mut data = self.encode(block_size);
        // The chain never shrinks below its current length; spare records stay empty
        let spare = (self.block_count * block_size).saturating_sub(data.len());
        let mut padding = vec![0u8; spare];
        for chunk in padding.chunks_exact_mut(DIRENTRY_SIZE) {
            encode_empty(chunk);
        }
        data.extend_from_slice(&padding);

        self.start_block = bat.write_chain(self.start_block, &data)?;
        self.block_count = data.len() / block_size;
        header.set_property_table(self.start_block, self.block_count as u32);
        log::debug!(
            "wrote {} properties to {} blocks starting at {}",
            self.len(),
            self.block_count,
            self.start_block
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::options::BlockSize;

    fn sample_table() -> (PropertyTable, EntryId, EntryId) {
        let mut table = PropertyTable::new();
        let root = table.root();
        let first = table.create_stream(root, "WordDocument", ENDOFCHAIN, 0).unwrap();
        let storage = table.create_storage(root, "ObjectPool").unwrap();
        table.create_stream(storage, "\u{1}Ole", 0, 20).unwrap();
        table.create_stream(root, "1Table", 5, 5000).unwrap();
        (table, first, storage)
    }

    fn names(table: &PropertyTable, parent: EntryId) -> Vec<String> {
        table
            .children(parent)
            .unwrap()
            .iter()
            .map(|&id| table.entry(id).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_new_table() {
        let table = PropertyTable::new();
        let root = table.entry(table.root()).unwrap();
        assert_eq!(root.name(), "Root Entry");
        assert_eq!(root.kind(), EntryKind::Root);
        assert_eq!(root.start_block(), ENDOFCHAIN);
        assert_eq!(table.start_block(), ENDOFCHAIN);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_create_and_lookup() {
        let (table, first, storage) = sample_table();
        let root = table.root();
        assert_eq!(names(&table, root), vec!["WordDocument", "ObjectPool", "1Table"]);
        assert_eq!(table.child_by_name(root, "worddocument").unwrap(), first);
        assert_eq!(table.child_by_name(root, "OBJECTPOOL").unwrap(), storage);
        assert!(matches!(
            table.child_by_name(root, "Missing"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(table.children(first), Err(Error::NotAStorage(_))));
        assert!(table.entry(first).unwrap().is_small());
        assert!(!table.entry(table.child_by_name(root, "1Table").unwrap()).unwrap().is_small());
    }

    #[test]
    fn test_name_rules() {
        let (mut table, first, _) = sample_table();
        let root = table.root();
        assert!(matches!(
            table.create_storage(root, "wordDOCUMENT"),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(table.create_storage(root, ""), Err(Error::InvalidName(_))));
        assert!(matches!(
            table.create_storage(root, &"x".repeat(32)),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(table.create_storage(root, "a/b"), Err(Error::InvalidName(_))));
        assert!(table.create_storage(root, &"x".repeat(31)).is_ok());
        assert!(matches!(
            table.create_storage(first, "Inner"),
            Err(Error::NotAStorage(_))
        ));
    }

    #[test]
    fn test_remove_recursive() {
        let (mut table, _, storage) = sample_table();
        let root = table.root();
        let removed = table.remove(storage).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(names(&table, root), vec!["WordDocument", "1Table"]);
        assert_eq!(table.len(), 3);
        assert!(table.get(storage).is_none());
        assert!(matches!(table.remove(root), Err(Error::InvalidName(_))));

        // Freed slots are reused
        let again = table.create_storage(root, "Again").unwrap();
        assert!(again.index() < 5);
    }

    #[test]
    fn test_encode_layout() {
        let (table, _, _) = sample_table();
        let data = table.encode(512);
        assert_eq!(data.len(), 1024);

        let raws: Vec<RawProperty> = data
            .chunks_exact(DIRENTRY_SIZE)
            .map(|chunk| RawProperty::read_from_bytes(chunk).unwrap())
            .collect();

        // Pre-order: root, WordDocument, ObjectPool, \1Ole, 1Table
        assert_eq!(raws[0].entry_type, STGTY_ROOT);
        assert_eq!(raws[0].child.get(), 1);
        assert_eq!(raws[1].name(), "WordDocument");
        assert_eq!(raws[1].right.get(), 2);
        assert_eq!(raws[1].left.get(), NOSTREAM);
        assert_eq!(raws[2].child.get(), 3);
        assert_eq!(raws[2].right.get(), 4);
        assert_eq!(raws[3].name(), "\u{1}Ole");
        assert_eq!(raws[3].right.get(), NOSTREAM);
        assert_eq!(raws[4].name(), "1Table");
        assert_eq!(raws[4].start.get(), 5);
        assert_eq!(raws[4].size.get(), 5000);
        assert_eq!(raws[1].node_color, NODE_BLACK);

        // Padding records are empty
        assert_eq!(raws[5].entry_type, STGTY_EMPTY);
        assert_eq!(raws[5].child.get(), NOSTREAM);
        assert_eq!(raws[7].name_len.get(), 0);
    }

    #[test]
    fn test_flush_and_load_preserves_order() {
        let (mut table, _, _) = sample_table();
        let root = table.root();
        table
            .entry_mut(root)
            .unwrap()
            .set_clsid([0x06, 0x09, 0x02, 0, 0, 0, 0, 0, 0xC0, 0, 0, 0, 0, 0, 0, 0x46]);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let mut header = HeaderBlock::new(BlockSize::Small);
        table.flush(&mut bat, &mut header).unwrap();
        assert_eq!(header.property_start(), 1);
        assert_eq!(table.count_blocks(), 2);
        assert_eq!(bat.chain(1).unwrap(), vec![1, 2]);

        let loaded = PropertyTable::load(&bat, 1).unwrap();
        let root = loaded.root();
        assert_eq!(names(&loaded, root), vec!["WordDocument", "ObjectPool", "1Table"]);
        let pool = loaded.child_by_name(root, "ObjectPool").unwrap();
        assert_eq!(names(&loaded, pool), vec!["\u{1}Ole"]);
        assert_eq!(
            loaded.entry(root).unwrap().clsid_string(),
            "00020906-0000-0000-C000-000000000046"
        );
        assert_eq!(loaded.entry(pool).unwrap().parent(), Some(root));
    }

    #[test]
    fn test_decode_sibling_tree_order() {
        // Root's child is B; B has left A and right C. The right link is
        // popped first, so the decoded order is B, C, A.
        let mut data = vec![0u8; 512];
        let mut put = |sid: usize, name: &str, kind: EntryKind, left: u32, right: u32, child: u32| {
            let p = Property::new(name.to_string(), kind, None);
            let chunk = &mut data[sid * DIRENTRY_SIZE..(sid + 1) * DIRENTRY_SIZE];
            p.encode_into(chunk, right, child);
            write_u32_le(chunk, 68, left);
        };
        put(0, "Root Entry", EntryKind::Root, NOSTREAM, NOSTREAM, 2);
        put(1, "A", EntryKind::Stream, NOSTREAM, NOSTREAM, NOSTREAM);
        put(2, "B", EntryKind::Stream, 1, 3, NOSTREAM);
        put(3, "C", EntryKind::Stream, NOSTREAM, NOSTREAM, NOSTREAM);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let start = bat.write_chain(ENDOFCHAIN, &data).unwrap();
        let table = PropertyTable::load(&bat, start).unwrap();
        assert_eq!(names(&table, table.root()), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_names_compare_upper_cased() {
        let mut table = PropertyTable::new();
        let root = table.root();
        let lower = table.create_storage(root, "k").unwrap();
        assert_eq!(table.child_by_name(root, "K").unwrap(), lower);

        // KELVIN SIGN lower-cases to 'k' but upper-cases to itself
        let kelvin = table.create_storage(root, "\u{212A}").unwrap();
        assert_ne!(kelvin, lower);
        assert_eq!(table.child_by_name(root, "\u{212A}").unwrap(), kelvin);
    }

    #[test]
    fn test_flush_keeps_decoded_block_count() {
        let mut data = vec![0u8; 3 * 512];
        for chunk in data.chunks_exact_mut(DIRENTRY_SIZE) {
            encode_empty(chunk);
        }
        let root = Property::new("Root Entry".to_string(), EntryKind::Root, None);
        root.encode_into(&mut data[0..128], NOSTREAM, NOSTREAM);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let start = bat.write_chain(ENDOFCHAIN, &data).unwrap();
        let mut table = PropertyTable::load(&bat, start).unwrap();
        assert_eq!(table.count_blocks(), 3);

        let mut header = HeaderBlock::new(BlockSize::Small);
        table.flush(&mut bat, &mut header).unwrap();
        assert_eq!(table.count_blocks(), 3);
        assert_eq!(table.start_block(), start);
        assert_eq!(bat.chain(start).unwrap().len(), 3);

        let last = bat.chain(start).unwrap()[2];
        let raw = RawProperty::read_from_bytes(&bat.read_block(last).unwrap()[..128]).unwrap();
        assert_eq!(raw.entry_type, STGTY_EMPTY);
        assert_eq!(raw.child.get(), NOSTREAM);
    }

    #[test]
    fn test_decode_deep_nesting() {
        const DEPTH: usize = 20_000;
        let mut table = PropertyTable::new();
        let mut parent = table.root();
        for _ in 0..DEPTH {
            parent = table.create_storage(parent, "Level").unwrap();
        }

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let mut header = HeaderBlock::new(BlockSize::Small);
        table.flush(&mut bat, &mut header).unwrap();

        let loaded = PropertyTable::load(&bat, header.property_start()).unwrap();
        assert_eq!(loaded.len(), DEPTH + 1);
        let mut current = loaded.root();
        let mut depth = 0;
        while let Some(&child) = loaded.children(current).unwrap().first() {
            current = child;
            depth += 1;
        }
        assert_eq!(depth, DEPTH);
    }

    #[test]
    fn test_decode_rejects_loop() {
        let mut data = vec![0u8; 512];
        let root = Property::new("Root Entry".to_string(), EntryKind::Root, None);
        root.encode_into(&mut data[0..128], NOSTREAM, 1);
        let child = Property::new("Loop".to_string(), EntryKind::Stream, None);
        child.encode_into(&mut data[128..256], 1, NOSTREAM);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let start = bat.write_chain(ENDOFCHAIN, &data).unwrap();
        assert!(matches!(
            PropertyTable::load(&bat, start),
            Err(Error::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_decode_rejects_link_outside_table() {
        let mut data = vec![0u8; 512];
        let root = Property::new("Root Entry".to_string(), EntryKind::Root, None);
        root.encode_into(&mut data[0..128], NOSTREAM, 9);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let start = bat.write_chain(ENDOFCHAIN, &data).unwrap();
        assert!(matches!(
            PropertyTable::load(&bat, start),
            Err(Error::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_decode_requires_root() {
        let mut data = vec![0u8; 512];
        let entry = Property::new("Stream".to_string(), EntryKind::Stream, None);
        entry.encode_into(&mut data[0..128], NOSTREAM, NOSTREAM);

        let mut bat = BlockAllocationTable::create(BlockSize::Small);
        let start = bat.write_chain(ENDOFCHAIN, &data).unwrap();
        assert!(matches!(
            PropertyTable::load(&bat, start),
            Err(Error::InvalidFormat(_))
        ));
    }
}
