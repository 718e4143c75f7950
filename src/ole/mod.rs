/// Constants for the compound file format
pub mod consts;

/// Creation options
pub mod options;

/// Header block codec
pub mod header;

/// Block-indexed file body
pub mod block_store;

/// Shared next-pointer tables and the allocator trait
pub mod alloc;

/// Block Allocation Table with XBAT extension
pub mod bat;

/// Mini-FAT and mini stream
pub mod mini_store;

/// Directory tree
pub mod property;

/// Document read cursors and push-writer sinks
pub mod document;

/// The filesystem façade
mod filesystem;


// Re-export public types for convenient access
pub use alloc::{BlockAllocator, BlockAndIndex, TableBlock};
pub use bat::BlockAllocationTable;
pub use document::{DocumentInputStream, DocumentSink, DocumentWriter};
pub use filesystem::OleFileSystem;
pub use header::HeaderBlock;
pub use mini_store::{MiniAllocator, MiniStore};
pub use options::{BlockSize, OleOptions};
pub use property::{EntryId, EntryKind, Property, PropertyTable};

/// Check whether `data` starts with the compound file signature.
pub fn is_ole_file(data: &[u8]) -> bool {
    data.len() >= consts::HEADER_SIZE && data.starts_with(consts::MAGIC)
}
