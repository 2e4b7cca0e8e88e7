//! Memory-mapped file of fixed-size sections.

use crate::error::{StorageError, StorageResult};
use memmap2::MmapRaw;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A memory-mapped record file divided into fixed-size sections.
///
/// The file is always an exact multiple of the section size. Sections are
/// addressed by index; byte ranges within a section are addressed by offset.
/// Growing the file remaps it; reads and writes go straight to the mapping.
///
/// # Concurrency contract
///
/// `read` and `write` take `&self` so that multiple writers can fill
/// disjoint byte ranges of the mapping concurrently. The caller must
/// guarantee that no two threads ever access an overlapping range at the
/// same time unless all accesses are reads. VersoDB's allocator upholds
/// this: payload blocks are written only while reserved and unpublished,
/// and prolog bytes are accessed only under the section's prolog lock.
///
/// # Example
///
/// ```no_run
/// use versodb_storage::SectionFile;
/// use std::path::Path;
///
/// let file = SectionFile::create(Path::new("records.vdb"), 65536).unwrap();
/// file.grow(1).unwrap();
/// file.write(0, 0, b"abc").unwrap();
/// assert_eq!(file.read(0, 0, 3).unwrap(), b"abc");
/// ```
pub struct SectionFile {
    path: PathBuf,
    section_size: usize,
    file: File,
    state: RwLock<MapState>,
}

struct MapState {
    /// `None` while the file is empty; mapping a zero-length file is
    /// not portable.
    map: Option<MmapRaw>,
    sections: u32,
}

impl SectionFile {
    /// Creates a new, empty section file, truncating any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path, section_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            section_size,
            file,
            state: RwLock::new(MapState {
                map: None,
                sections: 0,
            }),
        })
    }

    /// Opens an existing section file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its length is not
    /// a multiple of the section size.
    pub fn open(path: &Path, section_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        if len % section_size as u64 != 0 {
            return Err(StorageError::Corrupted(format!(
                "section file length {len} is not a multiple of section size {section_size}"
            )));
        }
        let sections = u32::try_from(len / section_size as u64)
            .map_err(|_| StorageError::Corrupted("section file too large".into()))?;

        let map = if len == 0 {
            None
        } else {
            Some(MmapRaw::map_raw(&file)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            section_size,
            file,
            state: RwLock::new(MapState { map, sections }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the section size in bytes.
    #[must_use]
    pub fn section_size(&self) -> usize {
        self.section_size
    }

    /// Returns the number of mapped sections.
    #[must_use]
    pub fn section_count(&self) -> u32 {
        self.state.read().sections
    }

    /// Grows the file by `count` zero-filled sections and remaps it.
    ///
    /// Returns the index of the first new section.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be extended or remapped.
    pub fn grow(&self, count: u32) -> StorageResult<u32> {
        let mut state = self.state.write();

        let first_new = state.sections;
        let new_sections = state.sections + count;
        let new_len = new_sections as u64 * self.section_size as u64;

        // Drop the old mapping before resizing the file.
        state.map = None;
        self.file.set_len(new_len)?;
        state.map = Some(MmapRaw::map_raw(&self.file)?);
        state.sections = new_sections;

        Ok(first_new)
    }

    /// Reads `len` bytes at `offset` within `section`.
    ///
    /// # Errors
    ///
    /// Returns an error if the section index or byte range is out of bounds.
    pub fn read(&self, section: u32, offset: usize, len: usize) -> StorageResult<Vec<u8>> {
        let state = self.state.read();
        let base = self.range_check(&state, section, offset, len)?;

        let mut buf = vec![0u8; len];
        if len > 0 {
            let map = state.map.as_ref().ok_or(StorageError::Closed)?;
            // SAFETY: range_check proved base..base+len lies inside the
            // mapping, and the caller contract rules out a concurrent
            // overlapping write.
            unsafe {
                std::ptr::copy_nonoverlapping(map.as_ptr().add(base), buf.as_mut_ptr(), len);
            }
        }
        Ok(buf)
    }

    /// Writes `data` at `offset` within `section`.
    ///
    /// # Errors
    ///
    /// Returns an error if the section index or byte range is out of bounds.
    pub fn write(&self, section: u32, offset: usize, data: &[u8]) -> StorageResult<()> {
        let state = self.state.read();
        let base = self.range_check(&state, section, offset, data.len())?;

        if !data.is_empty() {
            let map = state.map.as_ref().ok_or(StorageError::Closed)?;
            // SAFETY: range_check proved the destination lies inside the
            // mapping, and the caller contract rules out any concurrent
            // access to an overlapping range.
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), map.as_mut_ptr().add(base), data.len());
            }
        }
        Ok(())
    }

    /// Fills `len` bytes at `offset` within `section` with zeroes.
    ///
    /// # Errors
    ///
    /// Returns an error if the section index or byte range is out of bounds.
    pub fn zero(&self, section: u32, offset: usize, len: usize) -> StorageResult<()> {
        let state = self.state.read();
        let base = self.range_check(&state, section, offset, len)?;

        if len > 0 {
            let map = state.map.as_ref().ok_or(StorageError::Closed)?;
            // SAFETY: same contract as `write`.
            unsafe {
                std::ptr::write_bytes(map.as_mut_ptr().add(base), 0, len);
            }
        }
        Ok(())
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> StorageResult<()> {
        let state = self.state.read();
        if let Some(map) = state.map.as_ref() {
            map.flush()?;
        }
        Ok(())
    }

    fn range_check(
        &self,
        state: &MapState,
        section: u32,
        offset: usize,
        len: usize,
    ) -> StorageResult<usize> {
        if section >= state.sections {
            return Err(StorageError::SectionOutOfRange {
                section,
                count: state.sections,
            });
        }
        let end = offset
            .checked_add(len)
            .ok_or(StorageError::ReadPastEnd {
                offset: offset as u64,
                len,
                size: self.section_size as u64,
            })?;
        if end > self.section_size {
            return Err(StorageError::ReadPastEnd {
                offset: offset as u64,
                len,
                size: self.section_size as u64,
            });
        }
        Ok(section as usize * self.section_size + offset)
    }
}

impl std::fmt::Debug for SectionFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionFile")
            .field("path", &self.path)
            .field("section_size", &self.section_size)
            .field("sections", &self.section_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SECTION: usize = 4096;

    #[test]
    fn create_is_empty() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();
        assert_eq!(file.section_count(), 0);
    }

    #[test]
    fn grow_and_write_read() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();

        let first = file.grow(2).unwrap();
        assert_eq!(first, 0);
        assert_eq!(file.section_count(), 2);

        file.write(1, 100, b"payload").unwrap();
        assert_eq!(file.read(1, 100, 7).unwrap(), b"payload");

        // Untouched bytes read as zero
        assert_eq!(file.read(0, 0, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn zero_clears_bytes() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();
        file.grow(1).unwrap();

        file.write(0, 0, b"xxxx").unwrap();
        file.zero(0, 1, 2).unwrap();
        assert_eq!(file.read(0, 0, 4).unwrap(), b"x\0\0x");
    }

    #[test]
    fn out_of_range_section_fails() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();
        file.grow(1).unwrap();

        let result = file.read(5, 0, 1);
        assert!(matches!(
            result,
            Err(StorageError::SectionOutOfRange { section: 5, .. })
        ));
    }

    #[test]
    fn out_of_range_offset_fails() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();
        file.grow(1).unwrap();

        assert!(file.write(0, SECTION - 2, b"abc").is_err());
        assert!(file.read(0, SECTION, 1).is_err());
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.vdb");

        {
            let file = SectionFile::create(&path, SECTION).unwrap();
            file.grow(3).unwrap();
            file.write(2, 10, b"durable").unwrap();
            file.flush().unwrap();
        }

        let file = SectionFile::open(&path, SECTION).unwrap();
        assert_eq!(file.section_count(), 3);
        assert_eq!(file.read(2, 10, 7).unwrap(), b"durable");
    }

    #[test]
    fn open_rejects_misaligned_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.vdb");
        std::fs::write(&path, vec![0u8; SECTION + 1]).unwrap();

        let result = SectionFile::open(&path, SECTION);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn grow_preserves_existing_data() {
        let dir = tempdir().unwrap();
        let file = SectionFile::create(&dir.path().join("r.vdb"), SECTION).unwrap();
        file.grow(1).unwrap();
        file.write(0, 0, b"keep").unwrap();

        file.grow(4).unwrap();
        assert_eq!(file.section_count(), 5);
        assert_eq!(file.read(0, 0, 4).unwrap(), b"keep");
    }
}
