//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for VersoDB.
///
/// Storage backends are **opaque byte stores**. They provide simple operations
/// for reading, writing, appending, and flushing data. VersoDB core owns all
/// file format interpretation - backends do not understand ledger pages,
/// sections, or records.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` only overwrites bytes inside the current size
/// - `flush` ensures all written data is durable
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The offset is beyond the current size
    /// - The read would extend beyond the current size
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Overwrites `data.len()` bytes starting at `offset`.
    ///
    /// The written range must lie entirely within the current size; use
    /// [`StorageBackend::zero_extend`] first to grow the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the write would extend beyond the current size
    /// or an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Grows the storage to `new_size` bytes, filling new space with zeroes.
    ///
    /// A `new_size` at or below the current size is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be extended.
    fn zero_extend(&mut self, new_size: u64) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// After this returns successfully, all previously written data
    /// is guaranteed to survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// This removes all data after the specified offset. The ledger uses
    /// this to roll back a failed extension.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The truncation fails
    /// - `new_size` is greater than current size
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
