//! Error types for VersoDB core.

use crate::types::{RecordId, TxId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in VersoDB core operations.
///
/// Ordinary contention - a busy record, a version to chase - is never an
/// error; those are ordinary return values of the operations that produce
/// them. Errors here mean a caller mistake (`InvalidArgument`), a failing
/// environment (`Io`/`Storage`), or a violated invariant (`Internal`),
/// which callers are expected to answer by aborting the enclosing
/// transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] versodb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied argument was out of bounds.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the bad argument.
        message: String,
    },

    /// A record payload exceeded the maximum record size.
    #[error("record of {size} bytes exceeds maximum record size {max}")]
    RecordTooLarge {
        /// Requested payload size.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// A transaction in the current range cannot be registered because the
    /// range is within its reserved switching headroom.
    #[error("transaction id range {range} exhausted: {remaining} ids remain")]
    RangeExhausted {
        /// The current range index.
        range: u8,
        /// Ids remaining before the hard end of the range.
        remaining: u32,
    },

    /// A foreign transaction holds a claim this transaction tried to revert.
    #[error("record {record} is claimed by foreign transaction {holder}")]
    ForeignClaim {
        /// The record whose claim was touched.
        record: RecordId,
        /// The transaction holding the claim.
        holder: TxId,
    },

    /// The store is already open in another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A violated invariant; indicates a logic bug, not a recoverable state.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an internal invariant-violation error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
