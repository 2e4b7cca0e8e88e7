//! Core type definitions for VersoDB.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Size of one allocation block in bytes.
pub const BLOCK_SIZE: usize = 128;
/// Size of one section in bytes (64 KiB).
pub const SECTION_SIZE: usize = 64 * 1024;
/// Number of blocks in a section.
pub const BLOCKS_PER_SECTION: u16 = 512;
/// Number of prolog blocks at the start of each section.
pub const PROLOG_BLOCKS: u16 = 64;
/// First block usable for record payload.
pub const FIRST_DATA_BLOCK: u16 = PROLOG_BLOCKS;
/// Number of payload blocks in a section.
pub const DATA_BLOCKS: u16 = BLOCKS_PER_SECTION - PROLOG_BLOCKS;
/// Largest payload a single record can hold.
pub const MAX_RECORD_SIZE: usize = DATA_BLOCKS as usize * BLOCK_SIZE;

/// Number of transaction id ranges the 32-bit id space is split into.
pub const RANGE_COUNT: u32 = 4;
/// Number of ids in one range.
pub const RANGE_SIZE: u32 = 1 << 30;
/// Size of a ledger page in bytes.
pub const LEDGER_PAGE_SIZE: usize = 4096;
/// Transaction ids covered by one ledger bitmap page.
pub const IDS_PER_PAGE: u32 = (LEDGER_PAGE_SIZE * 8) as u32;
/// Ids reserved (and synced) from the ledger in one batch.
pub const RESERVATION_BATCH: u32 = 4096;
/// Ids held back at the end of a range for switching to the next one.
pub const RANGE_SWITCH_HEADROOM: u32 = 1 << 20;

/// Unique identifier for a transaction.
///
/// Transaction ids are 32-bit and issued sequentially from the current
/// range. Two sentinel values mark provably permanent outcomes:
/// [`TxId::ALWAYS_COMMITTED`] and [`TxId::NEVER_COMMITTED`]. They are
/// written back into record metadata once a real id's fate becomes
/// permanent so later visibility checks skip the ledger entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u32);

impl TxId {
    /// Sentinel: committed for every observer, past and future.
    pub const ALWAYS_COMMITTED: Self = Self(0);
    /// Sentinel: never committed for any observer.
    pub const NEVER_COMMITTED: Self = Self(u32::MAX);

    /// Creates a new transaction id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks whether this id is one of the two sentinels.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 == Self::ALWAYS_COMMITTED.0 || self.0 == Self::NEVER_COMMITTED.0
    }

    /// Returns the id range this id belongs to.
    #[must_use]
    pub const fn range(self) -> u8 {
        (self.0 / RANGE_SIZE) as u8
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier for a table owning sections.
///
/// Table id 0 is the free-section pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl TableId {
    /// The distinguished free-section pool.
    pub const FREE_POOL: Self = Self(0);

    /// Creates a new table id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Global section number within the record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub u32);

impl SectionId {
    /// Creates a new section id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section:{}", self.0)
    }
}

/// Identifier of a physical record slot.
///
/// Derived from (global section number, block number); stable for the life
/// of the slot. The low 9 bits hold the block, the rest the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

const BLOCK_BITS: u32 = 9;

impl RecordId {
    /// Creates a record id from a section and a block number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the block does not address a payload
    /// block of a section.
    pub fn new(section: SectionId, block: u16) -> CoreResult<Self> {
        if block < FIRST_DATA_BLOCK || block >= BLOCKS_PER_SECTION {
            return Err(CoreError::invalid_argument(format!(
                "block {block} does not address a payload block"
            )));
        }
        Ok(Self((u64::from(section.0) << BLOCK_BITS) | u64::from(block)))
    }

    /// Reconstructs a record id from its raw value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the encoded block is out of range.
    pub fn from_raw(raw: u64) -> CoreResult<Self> {
        let block = (raw & ((1 << BLOCK_BITS) - 1)) as u16;
        if block < FIRST_DATA_BLOCK {
            return Err(CoreError::invalid_argument(format!(
                "raw record id {raw} addresses a prolog block"
            )));
        }
        Ok(Self(raw))
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the global section number.
    #[must_use]
    pub const fn section(self) -> SectionId {
        SectionId((self.0 >> BLOCK_BITS) as u32)
    }

    /// Returns the block number within the section.
    #[must_use]
    pub const fn block(self) -> u16 {
        (self.0 & ((1 << BLOCK_BITS) - 1)) as u16
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}/{}", self.section().as_u32(), self.block())
    }
}

/// Commit status of a transaction id as seen through the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The transaction is still running and may yet commit.
    Busy,
    /// Committed, but some live transaction could still order against it.
    LocalCommitted,
    /// Rolled back, but the transaction object still exists.
    LocalRolledBack,
    /// Committed for every observer, past and future.
    GlobalCommitted,
    /// Rolled back for every observer, past and future.
    GlobalRolledBack,
}

impl TxStatus {
    /// Whether this status counts as committed for visibility.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::LocalCommitted | Self::GlobalCommitted)
    }

    /// Whether this status counts as rolled back for visibility.
    #[must_use]
    pub const fn is_rolled_back(self) -> bool {
        matches!(self, Self::LocalRolledBack | Self::GlobalRolledBack)
    }
}
