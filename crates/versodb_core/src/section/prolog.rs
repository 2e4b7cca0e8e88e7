//! Typed accessor over a section's prolog bytes.
//!
//! The first 64 blocks of every section form the prolog: a fixed header
//! followed by one 16-byte entry per block. Entries for the prolog blocks
//! themselves are never used, which is what leaves room for the header at
//! the front. All fields are little-endian at fixed offsets.

use crate::error::{CoreError, CoreResult};
use crate::types::{
    TableId, TxId, BLOCKS_PER_SECTION, BLOCK_SIZE, FIRST_DATA_BLOCK, PROLOG_BLOCKS, SECTION_SIZE,
};

/// Size of the prolog in bytes.
pub const PROLOG_SIZE: usize = PROLOG_BLOCKS as usize * BLOCK_SIZE;
/// Size of one per-block prolog entry.
pub const ENTRY_SIZE: usize = 16;
/// Length value marking a free block.
pub const LENGTH_FREE: u16 = 0;
/// Length value marking an interior block of a multi-block record.
pub const LENGTH_INTERIOR: u16 = 0xFFFF;

const HEADER_SIZE: usize = 24;

/// Fixed header at the front of every section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Total size marker, always the section size.
    pub size_marker: u32,
    /// On-disk format version.
    pub format_version: u32,
    /// Block size the section was written with.
    pub block_size: u32,
    /// Section size the section was written with.
    pub section_size: u32,
    /// Table owning this section; 0 is the free pool.
    pub owning_table: TableId,
    /// Cache-validity stamp; meaningful in section 0 only.
    pub cache_stamp: u32,
}

impl SectionHeader {
    /// A fresh header owned by `table` with the current layout constants.
    #[must_use]
    pub fn new(table: TableId, format_version: u32, cache_stamp: u32) -> Self {
        Self {
            size_marker: SECTION_SIZE as u32,
            format_version,
            block_size: BLOCK_SIZE as u32,
            section_size: SECTION_SIZE as u32,
            owning_table: table,
            cache_stamp,
        }
    }
}

/// One per-block prolog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Payload length for a record's first block, [`LENGTH_FREE`], or
    /// [`LENGTH_INTERIOR`].
    pub length: u16,
    /// Transaction that inserted the record.
    pub inserter: TxId,
    /// Transaction that expired (or is expiring) the record;
    /// `NEVER_COMMITTED` while unset.
    pub updater: TxId,
}

impl BlockEntry {
    /// The entry of a block holding no record.
    pub const FREE: Self = Self {
        length: LENGTH_FREE,
        inserter: TxId::ALWAYS_COMMITTED,
        updater: TxId::ALWAYS_COMMITTED,
    };

    /// Whether this entry marks a free block.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.length == LENGTH_FREE
    }

    /// Whether this entry marks an interior block.
    #[must_use]
    pub fn is_interior(&self) -> bool {
        self.length == LENGTH_INTERIOR
    }

    /// Whether this entry is the first block of a live record.
    #[must_use]
    pub fn is_record_head(&self) -> bool {
        self.length != LENGTH_FREE && self.length != LENGTH_INTERIOR
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            length: u16::from_le_bytes([bytes[0], bytes[1]]),
            inserter: TxId::new(u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]])),
            updater: TxId::new(u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]])),
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.length.to_le_bytes());
        bytes[2..6].copy_from_slice(&self.inserter.as_u32().to_le_bytes());
        bytes[6..10].copy_from_slice(&self.updater.as_u32().to_le_bytes());
        // Reserved tail stays untouched.
    }
}

/// Largest run of contiguous free blocks in a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRun {
    /// First block of the run.
    pub pos: u16,
    /// Number of blocks in the run.
    pub len: u16,
}

impl FreeRun {
    /// The free run of an empty section.
    pub const FULL: Self = Self {
        pos: FIRST_DATA_BLOCK,
        len: BLOCKS_PER_SECTION - FIRST_DATA_BLOCK,
    };

    /// Whether the run covers every payload block.
    #[must_use]
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }
}

/// Number of blocks needed to hold `len` payload bytes.
#[must_use]
pub fn blocks_for(len: usize) -> u16 {
    len.div_ceil(BLOCK_SIZE) as u16
}

/// An in-memory image of one section's prolog.
///
/// All reads and mutations go through block-validated accessors; the
/// image is written back to the section file as a whole under the
/// section's prolog lock.
#[derive(Debug)]
pub struct Prolog {
    bytes: Vec<u8>,
}

impl Prolog {
    /// Wraps a prolog image read from a section file.
    ///
    /// # Errors
    ///
    /// `Internal` if the image is not exactly one prolog long.
    pub fn from_bytes(bytes: Vec<u8>) -> CoreResult<Self> {
        if bytes.len() != PROLOG_SIZE {
            return Err(CoreError::internal(format!(
                "prolog image of {} bytes, expected {PROLOG_SIZE}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// The raw image, for writing back to the section file.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the section header.
    #[must_use]
    pub fn header(&self) -> SectionHeader {
        let word = |at: usize| {
            u32::from_le_bytes([
                self.bytes[at],
                self.bytes[at + 1],
                self.bytes[at + 2],
                self.bytes[at + 3],
            ])
        };
        SectionHeader {
            size_marker: word(0),
            format_version: word(4),
            block_size: word(8),
            section_size: word(12),
            owning_table: TableId::new(word(16)),
            cache_stamp: word(20),
        }
    }

    /// Encodes the section header.
    pub fn set_header(&mut self, header: &SectionHeader) {
        let fields = [
            header.size_marker,
            header.format_version,
            header.block_size,
            header.section_size,
            header.owning_table.as_u32(),
            header.cache_stamp,
        ];
        for (i, field) in fields.iter().enumerate() {
            self.bytes[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        debug_assert_eq!(HEADER_SIZE, fields.len() * 4);
    }

    /// Reads the entry of a payload block.
    ///
    /// # Errors
    ///
    /// `Internal` if `block` does not address a payload block.
    pub fn entry(&self, block: u16) -> CoreResult<BlockEntry> {
        let at = Self::entry_offset(block)?;
        Ok(BlockEntry::decode(&self.bytes[at..at + ENTRY_SIZE]))
    }

    /// Writes the entry of a payload block.
    ///
    /// # Errors
    ///
    /// `Internal` if `block` does not address a payload block.
    pub fn set_entry(&mut self, block: u16, entry: &BlockEntry) -> CoreResult<()> {
        let at = Self::entry_offset(block)?;
        entry.encode(&mut self.bytes[at..at + ENTRY_SIZE]);
        Ok(())
    }

    /// Zeroes the entry of a payload block, marking it free.
    ///
    /// # Errors
    ///
    /// `Internal` if `block` does not address a payload block.
    pub fn clear_entry(&mut self, block: u16) -> CoreResult<()> {
        let at = Self::entry_offset(block)?;
        self.bytes[at..at + ENTRY_SIZE].fill(0);
        Ok(())
    }

    /// Scans for the largest run of contiguous free blocks.
    #[must_use]
    pub fn scan_free_run(&self) -> FreeRun {
        let mut best = FreeRun {
            pos: FIRST_DATA_BLOCK,
            len: 0,
        };
        let mut run_start = FIRST_DATA_BLOCK;
        let mut run_len: u16 = 0;

        for block in FIRST_DATA_BLOCK..BLOCKS_PER_SECTION {
            let at = block as usize * ENTRY_SIZE;
            let length = u16::from_le_bytes([self.bytes[at], self.bytes[at + 1]]);
            if length == LENGTH_FREE {
                if run_len == 0 {
                    run_start = block;
                }
                run_len += 1;
                if run_len > best.len {
                    best = FreeRun {
                        pos: run_start,
                        len: run_len,
                    };
                }
            } else {
                run_len = 0;
            }
        }
        best
    }

    fn entry_offset(block: u16) -> CoreResult<usize> {
        if block < FIRST_DATA_BLOCK || block >= BLOCKS_PER_SECTION {
            return Err(CoreError::internal(format!(
                "prolog entry access for non-payload block {block}"
            )));
        }
        Ok(block as usize * ENTRY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DATA_BLOCKS;
    use proptest::prelude::*;

    fn empty_prolog() -> Prolog {
        Prolog::from_bytes(vec![0u8; PROLOG_SIZE]).unwrap()
    }

    #[test]
    fn header_roundtrip() {
        let mut prolog = empty_prolog();
        let header = SectionHeader::new(TableId::new(7), 3, 42);
        prolog.set_header(&header);
        assert_eq!(prolog.header(), header);
    }

    #[test]
    fn zeroed_prolog_is_fully_free() {
        let prolog = empty_prolog();
        assert!(prolog.scan_free_run().is_full());
        assert_eq!(prolog.header().owning_table, TableId::FREE_POOL);
    }

    #[test]
    fn entry_roundtrip() {
        let mut prolog = empty_prolog();
        let entry = BlockEntry {
            length: 200,
            inserter: TxId::new(17),
            updater: TxId::NEVER_COMMITTED,
        };
        prolog.set_entry(100, &entry).unwrap();
        assert_eq!(prolog.entry(100).unwrap(), entry);
        assert!(prolog.entry(101).unwrap().is_free());
    }

    #[test]
    fn prolog_block_entry_access_fails() {
        let prolog = empty_prolog();
        assert!(prolog.entry(FIRST_DATA_BLOCK - 1).is_err());
        assert!(prolog.entry(BLOCKS_PER_SECTION).is_err());
    }

    #[test]
    fn header_and_entries_do_not_overlap() {
        let mut prolog = empty_prolog();
        prolog.set_header(&SectionHeader::new(TableId::new(9), 1, 77));
        let entry = BlockEntry {
            length: 1,
            inserter: TxId::new(5),
            updater: TxId::NEVER_COMMITTED,
        };
        prolog.set_entry(FIRST_DATA_BLOCK, &entry).unwrap();

        assert_eq!(prolog.header().owning_table, TableId::new(9));
        assert_eq!(prolog.entry(FIRST_DATA_BLOCK).unwrap(), entry);
    }

    #[test]
    fn free_run_tracks_largest_gap() {
        let mut prolog = empty_prolog();
        let head = BlockEntry {
            length: 10,
            inserter: TxId::new(1),
            updater: TxId::NEVER_COMMITTED,
        };
        // Occupy one block in the middle of the payload area.
        prolog.set_entry(200, &head).unwrap();

        let run = prolog.scan_free_run();
        assert_eq!(run.pos, 201);
        assert_eq!(run.len, BLOCKS_PER_SECTION - 201);

        prolog.clear_entry(200).unwrap();
        assert!(prolog.scan_free_run().is_full());
    }

    #[test]
    fn blocks_for_payload_sizes() {
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(BLOCK_SIZE), 1);
        assert_eq!(blocks_for(BLOCK_SIZE + 1), 2);
        assert_eq!(blocks_for(crate::types::MAX_RECORD_SIZE), DATA_BLOCKS);
    }

    proptest! {
        #[test]
        fn entry_codec_roundtrip(
            length in 0u16..=u16::MAX,
            inserter in 0u32..=u32::MAX,
            updater in 0u32..=u32::MAX,
            block in FIRST_DATA_BLOCK..BLOCKS_PER_SECTION,
        ) {
            let mut prolog = empty_prolog();
            let entry = BlockEntry {
                length,
                inserter: TxId::new(inserter),
                updater: TxId::new(updater),
            };
            prolog.set_entry(block, &entry).unwrap();
            prop_assert_eq!(prolog.entry(block).unwrap(), entry);
        }
    }
}
