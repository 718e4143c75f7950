//! Unified error types for the storage engine.
//!
//! Errors fall into four families: format errors raised while decoding a
//! file, range errors raised when a table is addressed past its coverage,
//! lookup errors for missing entries, and I/O errors from the byte source or
//! sink. None of them is ever swallowed to produce a partial structure.
use thiserror::Error;

/// Main error type for compound file operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying source or sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or record layout does not match the format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Truncated input, broken chains or a malformed directory tree
    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    /// A table index beyond the currently allocated table blocks
    #[error("Index {index} is outside the allocated table coverage of {coverage} entries")]
    OutOfRange { index: u32, coverage: u32 },

    /// Entry lookup by name or path failed
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// A sibling with the same name already exists
    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    /// Name is empty or does not fit in a directory record
    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    /// Operation requires a storage (or the root) entry
    #[error("Not a storage: {0}")]
    NotAStorage(String),

    /// Operation requires a stream entry
    #[error("Not a document: {0}")]
    NotADocument(String),

    /// A push writer produced a different number of bytes than declared
    #[error("Document size mismatch: declared {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Result type for compound file operations.
pub type Result<T> = std::result::Result<T, Error>;
