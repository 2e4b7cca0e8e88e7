//! Section-cache snapshot file.
//!
//! A clean shutdown writes each section's owning table and free run to a
//! small sidecar file so reopening skips the full prolog rescan. The file
//! is invalidated in place (magic zeroed, synced) before every rewrite, so
//! a crash mid-write reads back as absent rather than misread. The stamp
//! ties a snapshot to one fixed generation of the record file.

use crate::error::{CoreError, CoreResult};
use crate::section::prolog::FreeRun;
use crate::types::TableId;
use tracing::debug;
use versodb_storage::StorageBackend;

const MAGIC: u32 = u32::from_le_bytes(*b"VCS1");
const HEADER_LEN: u64 = 12;
const ENTRY_LEN: u64 = 12;

/// One section's cached state: owning table and published free run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Table owning the section; table 0 marks a pool section.
    pub table: TableId,
    /// The section's free run at snapshot time.
    pub free_run: FreeRun,
}

/// Reader/writer for the snapshot sidecar of one record file.
pub struct SectionCache {
    backend: Box<dyn StorageBackend>,
}

impl SectionCache {
    /// Wraps a byte store holding (or about to hold) a snapshot.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Loads the snapshot, if it is present and matches `expected_stamp`.
    ///
    /// Any absent, invalidated, stale or truncated snapshot is `None`;
    /// the caller rescans the record file instead.
    pub fn load(&self, expected_stamp: u32) -> CoreResult<Option<Vec<CacheEntry>>> {
        let size = self.backend.size()?;
        if size < HEADER_LEN {
            return Ok(None);
        }

        let header = self.backend.read_at(0, HEADER_LEN as usize)?;
        let word = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        if word(0) != MAGIC || word(4) != expected_stamp {
            return Ok(None);
        }

        let count = word(8) as u64;
        if size < HEADER_LEN + count * ENTRY_LEN {
            return Ok(None);
        }

        let body = self
            .backend
            .read_at(HEADER_LEN, (count * ENTRY_LEN) as usize)?;
        let mut entries = Vec::with_capacity(count as usize);
        for chunk in body.chunks_exact(ENTRY_LEN as usize) {
            let field = |at: usize| {
                u32::from_le_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
            };
            let pos = field(4);
            let len = field(8);
            if pos > u32::from(u16::MAX) || len > u32::from(u16::MAX) {
                return Ok(None);
            }
            entries.push(CacheEntry {
                table: TableId::new(field(0)),
                free_run: FreeRun {
                    pos: pos as u16,
                    len: len as u16,
                },
            });
        }
        debug!(sections = entries.len(), "loaded section cache snapshot");
        Ok(Some(entries))
    }

    /// Writes a fresh snapshot for `stamp`.
    ///
    /// The old magic is zeroed and synced before the body is rewritten, and
    /// the magic is restored and synced last.
    pub fn save(&mut self, stamp: u32, entries: &[CacheEntry]) -> CoreResult<()> {
        let size = self.backend.size()?;
        if size >= 4 {
            self.backend.write_at(0, &[0u8; 4])?;
            self.backend.sync()?;
        }

        let total = HEADER_LEN + entries.len() as u64 * ENTRY_LEN;
        if size < total {
            self.backend.zero_extend(total)?;
        } else if size > total {
            self.backend.truncate(total)?;
        }

        let count = u32::try_from(entries.len())
            .map_err(|_| CoreError::invalid_argument("too many sections for a cache snapshot"))?;
        let mut body = Vec::with_capacity((total - 4) as usize);
        body.extend_from_slice(&stamp.to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        for entry in entries {
            body.extend_from_slice(&entry.table.as_u32().to_le_bytes());
            body.extend_from_slice(&u32::from(entry.free_run.pos).to_le_bytes());
            body.extend_from_slice(&u32::from(entry.free_run.len).to_le_bytes());
        }
        self.backend.write_at(4, &body)?;

        self.backend.write_at(0, &MAGIC.to_le_bytes())?;
        self.backend.sync()?;
        debug!(sections = entries.len(), stamp, "saved section cache snapshot");
        Ok(())
    }
}

impl std::fmt::Debug for SectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use versodb_storage::InMemoryBackend;

    fn sample_entries() -> Vec<CacheEntry> {
        vec![
            CacheEntry {
                table: TableId::new(3),
                free_run: FreeRun { pos: 100, len: 50 },
            },
            CacheEntry {
                table: TableId::FREE_POOL,
                free_run: FreeRun::FULL,
            },
        ]
    }

    #[test]
    fn save_load_roundtrip() {
        let mut cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        let entries = sample_entries();

        cache.save(7, &entries).unwrap();
        assert_eq!(cache.load(7).unwrap(), Some(entries));
    }

    #[test]
    fn absent_snapshot_loads_as_none() {
        let cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        assert_eq!(cache.load(1).unwrap(), None);
    }

    #[test]
    fn stale_stamp_invalidates() {
        let mut cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        cache.save(7, &sample_entries()).unwrap();
        assert_eq!(cache.load(8).unwrap(), None);
    }

    #[test]
    fn zeroed_magic_reads_as_absent() {
        let mut cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        cache.save(7, &sample_entries()).unwrap();

        cache.backend.write_at(0, &[0u8; 4]).unwrap();
        assert_eq!(cache.load(7).unwrap(), None);
    }

    #[test]
    fn truncated_body_reads_as_absent() {
        let mut cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        cache.save(7, &sample_entries()).unwrap();

        let size = cache.backend.size().unwrap();
        cache.backend.truncate(size - 4).unwrap();
        assert_eq!(cache.load(7).unwrap(), None);
    }

    #[test]
    fn rewrite_shrinks_older_snapshot() {
        let mut cache = SectionCache::new(Box::new(InMemoryBackend::new()));
        cache.save(1, &sample_entries()).unwrap();

        let smaller = vec![CacheEntry {
            table: TableId::new(1),
            free_run: FreeRun { pos: 64, len: 1 },
        }];
        cache.save(2, &smaller).unwrap();
        assert_eq!(cache.load(2).unwrap(), Some(smaller));
    }
}
