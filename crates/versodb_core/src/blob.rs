//! Blob service collaborator interface.
//!
//! Values too large for inline record storage are handed to an external
//! blob manager. The store never interprets blob contents; it only carries
//! the returned ids.

use crate::error::CoreResult;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Opaque identifier of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(pub u64);

impl BlobId {
    /// Creates a new blob id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

/// External manager for record values that exceed inline size.
pub trait BlobService: Send + Sync {
    /// Stores `size` bytes read from `reader` and returns the blob's id.
    fn store_blob(&self, size: u64, reader: &mut dyn Read) -> CoreResult<BlobId>;

    /// Registers an existing file as a blob and returns its id.
    fn restore_blob_file(&self, path: &Path) -> CoreResult<BlobId>;
}
