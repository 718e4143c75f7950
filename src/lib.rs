//! olestore - read, modify and write OLE2 compound files
//!
//! A compound file (CFBF, the container behind legacy Office documents) is a
//! small filesystem packed into one file: a tree of named storages and
//! streams, stored in fixed-size blocks linked through allocation tables.
//! This crate decodes such a file into memory, lets you navigate and change
//! the tree, and writes it back out.
//!
//! # Features
//!
//! - **512- and 4096-byte block files**, including BAT growth beyond the 109
//!   header slots through XBAT blocks
//! - **Mini store** for documents below 4096 bytes
//! - **Stable child order**: directories list their children in the order
//!   they were decoded or created, and writing preserves it
//! - **Push-style writers** that produce a document's bytes only when the
//!   file is written
//! - **Strict open**: every chain is validated, a file opens fully or not at all
//!
//! # Example - Listing a file
//!
//! ```no_run
//! use olestore::ole::OleFileSystem;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fs = OleFileSystem::open_path("document.doc")?;
//! for &child in fs.children(fs.root())? {
//!     let entry = fs.entry(child)?;
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Writing a file
//!
//! ```no_run
//! use olestore::ole::OleFileSystem;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut fs = OleFileSystem::create();
//! let root = fs.root();
//! fs.create_document(root, "WordDocument", b"Hello")?;
//! fs.write_to_path("output.ole")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! Diagnostics go through the [`log`] facade: open and write summaries at
//! `debug`, table growth at `trace`, tolerated oddities in input files at
//! `warn`. No logger is installed by the library.

/// Shared error type and little-endian helpers
pub mod common;

/// Compound file engine
///
/// Header, block store, allocation tables, mini store, property table and
/// the [`OleFileSystem`](ole::OleFileSystem) façade tying them together.
pub mod ole;

pub use common::{Error, Result};
pub use ole::OleFileSystem;
