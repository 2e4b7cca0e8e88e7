//! Durable ledger file: header page plus commit-bit bitmap pages.
//!
//! Layout (little-endian, fixed offsets):
//!
//! ```text
//! page 0 (4096 B header):
//!   0   u32   format version
//!   4   u32   last-used id, range 0
//!   8   u32   last-used id, range 1
//!   12  u32   last-used id, range 2
//!   16  u32   last-used id, range 3
//!   20  u8    current range index
//! pages 1.. (4096 B each): commit bitmaps, allocated round-robin
//!   page(id) = ((id % RANGE_SIZE) / IDS_PER_PAGE) * 4 + range(id) + 1
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{TxId, IDS_PER_PAGE, LEDGER_PAGE_SIZE, RANGE_COUNT, RANGE_SIZE};
use tracing::error;
use versodb_storage::StorageBackend;

/// Current ledger format version.
pub const LEDGER_VERSION: u32 = 1;

const HEADER_PAGES: u64 = 1;
const OFF_VERSION: u64 = 0;
const OFF_LAST_USED: u64 = 4;
const OFF_CURRENT_RANGE: u64 = 20;

/// First id of the given range.
pub(crate) fn range_first(range: u8) -> u32 {
    u32::from(range) * RANGE_SIZE
}

/// One-past-the-last issuable id of the given range.
///
/// For the final range this excludes `u32::MAX`, which is a sentinel.
pub(crate) fn range_end(range: u8) -> u64 {
    let end = (u64::from(range) + 1) * u64::from(RANGE_SIZE);
    end.min(u64::from(u32::MAX))
}

/// The durable half of the transaction ledger.
///
/// Owns the backing byte store and all header/bitmap offset arithmetic.
/// Callers serialize access through the ledger's internal lock.
pub(crate) struct LedgerFile {
    backend: Box<dyn StorageBackend>,
    last_used: [u32; RANGE_COUNT as usize],
    current_range: u8,
}

impl LedgerFile {
    /// Opens a ledger file, initializing an empty backend in place.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        if backend.size()? == 0 {
            backend.zero_extend(HEADER_PAGES * LEDGER_PAGE_SIZE as u64)?;
            let mut file = Self {
                backend,
                last_used: [
                    range_first(0),
                    range_first(1),
                    range_first(2),
                    range_first(3),
                ],
                current_range: 0,
            };
            file.write_header()?;
            file.sync()?;
            return Ok(file);
        }

        let header = backend.read_at(0, LEDGER_PAGE_SIZE)?;
        let version = read_u32(&header, OFF_VERSION as usize);
        if version != LEDGER_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported ledger version {version}"
            )));
        }

        let mut last_used = [0u32; RANGE_COUNT as usize];
        for (i, slot) in last_used.iter_mut().enumerate() {
            *slot = read_u32(&header, OFF_LAST_USED as usize + i * 4);
        }
        let current_range = header[OFF_CURRENT_RANGE as usize];
        if u32::from(current_range) >= RANGE_COUNT {
            return Err(CoreError::invalid_format(format!(
                "ledger current range {current_range} out of bounds"
            )));
        }

        Ok(Self {
            backend,
            last_used,
            current_range,
        })
    }

    /// Returns the last-used id for a range.
    pub fn last_used(&self, range: u8) -> u32 {
        self.last_used[range as usize]
    }

    /// Returns the current range index.
    pub fn current_range(&self) -> u8 {
        self.current_range
    }

    /// Persists a new last-used id for a range.
    pub fn set_last_used(&mut self, range: u8, id: u32) -> CoreResult<()> {
        self.last_used[range as usize] = id;
        self.backend
            .write_at(OFF_LAST_USED + u64::from(range) * 4, &id.to_le_bytes())?;
        Ok(())
    }

    /// Persists a new current range index.
    pub fn set_current_range(&mut self, range: u8) -> CoreResult<()> {
        self.current_range = range;
        self.backend.write_at(OFF_CURRENT_RANGE, &[range])?;
        Ok(())
    }

    /// Reads the durable commit bit for an id.
    ///
    /// Ids whose bitmap page was never allocated read as not committed.
    pub fn commit_bit(&self, id: TxId) -> CoreResult<bool> {
        let (offset, mask) = bit_location(id);
        if offset >= self.backend.size()? {
            return Ok(false);
        }
        let byte = self.backend.read_at(offset, 1)?;
        Ok(byte[0] & mask != 0)
    }

    /// Sets the durable commit bit for an id.
    ///
    /// The id's bitmap page must have been reserved beforehand.
    pub fn set_commit_bit(&mut self, id: TxId) -> CoreResult<()> {
        let (offset, mask) = bit_location(id);
        if offset >= self.backend.size()? {
            return Err(CoreError::internal(format!(
                "commit bit for unreserved id {id}"
            )));
        }
        let byte = self.backend.read_at(offset, 1)?;
        self.backend.write_at(offset, &[byte[0] | mask])?;
        Ok(())
    }

    /// Extends the file so every id up to and including `id` has a bitmap
    /// page, syncing the new length.
    ///
    /// On a failed extension one recovery attempt truncates back to the
    /// original length; if that also fails the process aborts rather than
    /// continue with durability silently lost.
    pub fn ensure_pages_for(&mut self, id: TxId) -> CoreResult<()> {
        let page = page_index(id);
        let needed = (page + 1) * LEDGER_PAGE_SIZE as u64;
        let current = self.backend.size()?;
        if needed <= current {
            return Ok(());
        }

        if let Err(extend_err) = self.try_extend(needed) {
            error!(
                needed,
                current,
                error = %extend_err,
                "ledger extension failed; attempting recovery"
            );
            if self.backend.truncate(current).is_err() || self.try_extend(needed).is_err() {
                error!("ledger extension unrecoverable; aborting to preserve durability");
                std::process::abort();
            }
        }
        Ok(())
    }

    fn try_extend(&mut self, needed: u64) -> CoreResult<()> {
        self.backend.zero_extend(needed)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Zeroes every allocated bitmap page of a range.
    pub fn clear_range_pages(&mut self, range: u8) -> CoreResult<()> {
        let size = self.backend.size()?;
        let pages = size / LEDGER_PAGE_SIZE as u64;
        let zeroes = vec![0u8; LEDGER_PAGE_SIZE];

        let mut page = HEADER_PAGES + u64::from(range);
        while page < pages {
            self.backend
                .write_at(page * LEDGER_PAGE_SIZE as u64, &zeroes)?;
            page += u64::from(RANGE_COUNT);
        }
        Ok(())
    }

    /// Rewrites the whole header from in-memory state.
    pub fn write_header(&mut self) -> CoreResult<()> {
        let mut header = [0u8; 21];
        header[0..4].copy_from_slice(&LEDGER_VERSION.to_le_bytes());
        for (i, id) in self.last_used.iter().enumerate() {
            header[4 + i * 4..8 + i * 4].copy_from_slice(&id.to_le_bytes());
        }
        header[20] = self.current_range;
        self.backend.write_at(0, &header)?;
        Ok(())
    }

    /// Syncs all ledger data to durable storage.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

/// Index of the bitmap page holding an id's commit bit.
fn page_index(id: TxId) -> u64 {
    let within_range = u64::from(id.as_u32() % RANGE_SIZE);
    (within_range / u64::from(IDS_PER_PAGE)) * u64::from(RANGE_COUNT)
        + u64::from(id.range())
        + HEADER_PAGES
}

/// Byte offset and bit mask of an id's commit bit.
fn bit_location(id: TxId) -> (u64, u8) {
    let bit = id.as_u32() % IDS_PER_PAGE;
    let offset = page_index(id) * LEDGER_PAGE_SIZE as u64 + u64::from(bit / 8);
    (offset, 1 << (bit % 8))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use versodb_storage::InMemoryBackend;

    fn create_file() -> LedgerFile {
        LedgerFile::open(Box::new(InMemoryBackend::new())).unwrap()
    }

    #[test]
    fn fresh_file_defaults() {
        let file = create_file();
        assert_eq!(file.current_range(), 0);
        assert_eq!(file.last_used(0), 0);
        assert_eq!(file.last_used(2), range_first(2));
    }

    #[test]
    fn page_layout_round_robin() {
        // First page of each range sits directly after the header.
        assert_eq!(page_index(TxId::new(1)), 1);
        assert_eq!(page_index(TxId::new(RANGE_SIZE)), 2);
        assert_eq!(page_index(TxId::new(2 * RANGE_SIZE)), 3);
        assert_eq!(page_index(TxId::new(3 * RANGE_SIZE)), 4);
        // Second page of range 0 comes after the first pages of all ranges.
        assert_eq!(page_index(TxId::new(IDS_PER_PAGE)), 5);
    }

    #[test]
    fn commit_bit_roundtrip() {
        let mut file = create_file();
        let id = TxId::new(17);

        file.ensure_pages_for(id).unwrap();
        assert!(!file.commit_bit(id).unwrap());

        file.set_commit_bit(id).unwrap();
        assert!(file.commit_bit(id).unwrap());

        // Neighbor bits stay clear
        assert!(!file.commit_bit(TxId::new(16)).unwrap());
        assert!(!file.commit_bit(TxId::new(18)).unwrap());
    }

    #[test]
    fn unreserved_id_reads_uncommitted() {
        let file = create_file();
        assert!(!file.commit_bit(TxId::new(2 * RANGE_SIZE + 5)).unwrap());
    }

    #[test]
    fn set_bit_on_unreserved_id_fails() {
        let mut file = create_file();
        let result = file.set_commit_bit(TxId::new(RANGE_SIZE + 1));
        assert!(matches!(result, Err(CoreError::Internal { .. })));
    }

    #[test]
    fn clear_range_pages_zeroes_only_that_range() {
        let mut file = create_file();
        let in_zero = TxId::new(9);
        let in_one = TxId::new(RANGE_SIZE + 9);

        file.ensure_pages_for(in_zero).unwrap();
        file.ensure_pages_for(in_one).unwrap();
        file.set_commit_bit(in_zero).unwrap();
        file.set_commit_bit(in_one).unwrap();

        file.clear_range_pages(0).unwrap();

        assert!(!file.commit_bit(in_zero).unwrap());
        assert!(file.commit_bit(in_one).unwrap());
    }

    #[test]
    fn header_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.vdb");

        {
            let backend = versodb_storage::FileBackend::open(&path).unwrap();
            let mut file = LedgerFile::open(Box::new(backend)).unwrap();
            file.set_last_used(0, 4096).unwrap();
            file.set_current_range(1).unwrap();
            file.sync().unwrap();
        }

        let backend = versodb_storage::FileBackend::open(&path).unwrap();
        let file = LedgerFile::open(Box::new(backend)).unwrap();
        assert_eq!(file.last_used(0), 4096);
        assert_eq!(file.current_range(), 1);
    }

    #[test]
    fn range_bounds() {
        assert_eq!(range_first(0), 0);
        assert_eq!(range_first(3), 3 * RANGE_SIZE);
        assert_eq!(range_end(0), u64::from(RANGE_SIZE));
        // The final range stops short of the NEVER_COMMITTED sentinel.
        assert_eq!(range_end(3), u64::from(u32::MAX));
    }
}
