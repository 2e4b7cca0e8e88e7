//! # VersoDB Storage
//!
//! Storage backends and mapped section files for VersoDB.
//!
//! This crate provides the lowest-level storage abstraction for VersoDB.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, write, append, flush)
//! - No knowledge of VersoDB file formats, ledgers, or sections
//! - Must be `Send + Sync` for concurrent access
//! - VersoDB core owns all file format interpretation
//!
//! ## Available Stores
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent storage using OS file APIs
//! - [`SectionFile`] - Memory-mapped file of fixed-size sections
//!
//! ## Example
//!
//! ```rust
//! use versodb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod mapped;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use mapped::SectionFile;
pub use memory::InMemoryBackend;
