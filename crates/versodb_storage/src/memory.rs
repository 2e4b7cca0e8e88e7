//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in a `Vec<u8>`. It is intended for
/// testing and ephemeral stores - nothing survives the process.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use versodb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.append(b"hello").unwrap();
/// assert_eq!(backend.size().unwrap(), 5);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory backend pre-filled with the given bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        let end = offset.saturating_add(bytes.len() as u64);

        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }

        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn zero_extend(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_size as usize > data.len() {
            data.resize(new_size as usize, 0);
        }
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();

        if new_size as usize > data.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot truncate beyond current size",
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_append_and_read() {
        let mut backend = InMemoryBackend::new();

        let offset = backend.append(b"hello").unwrap();
        assert_eq!(offset, 0);
        assert_eq!(backend.size().unwrap(), 5);

        let data = backend.read_at(0, 5).unwrap();
        assert_eq!(&data, b"hello");
    }

    #[test]
    fn memory_write_at() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        backend.write_at(0, b"jello").unwrap();
        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"jello world");
    }

    #[test]
    fn memory_write_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        let result = backend.write_at(2, b"xyz");
        assert!(matches!(result, Err(StorageError::WritePastEnd { .. })));
    }

    #[test]
    fn memory_zero_extend() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"ab").unwrap();
        backend.zero_extend(6).unwrap();

        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.read_at(2, 4).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn memory_read_past_end_fails() {
        let backend = InMemoryBackend::new();
        let result = backend.read_at(0, 1);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(&backend.read_at(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.read_at(1, 2).unwrap(), vec![2, 3]);
    }
}
