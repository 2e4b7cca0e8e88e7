//! The store context: one open VersoDB record store.
//!
//! A [`Store`] wires the ledger, the section allocator, the chase registry
//! and the section cache over one locked directory. It is constructed once
//! and passed by reference to every operation; there is no process-wide
//! state.

use crate::blob::{BlobId, BlobService};
use crate::chase::ChaseRegistry;
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::ledger::TransactionLedger;
use crate::section::{SectionAllocator, SectionCache};
use crate::types::{RecordId, SectionId, TableId, TxId};
use crate::view::{ShowMode, TransactionView, TxKind, Visibility};
use parking_lot::{Mutex, RwLock};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use versodb_storage::FileBackend;
use versodb_storage::SectionFile;

/// Callback invoked with the sections a rolled-back transaction wrote
/// into, so the janitor can proactively rescan them.
pub type CleanHint = Box<dyn Fn(&[SectionId]) + Send + Sync>;

/// One open record store.
pub struct Store {
    dir: StoreDir,
    ledger: TransactionLedger,
    allocator: SectionAllocator,
    chase: ChaseRegistry,
    cache: Mutex<SectionCache>,
    clean_hint: RwLock<Option<CleanHint>>,
    blob: RwLock<Option<Arc<dyn BlobService>>>,
}

impl Store {
    /// Opens (or creates) a store at `path`.
    ///
    /// The directory is locked for exclusive access. The section cache is
    /// consumed when its stamp matches the record file; otherwise every
    /// section prolog is rescanned. Either way the stamp is bumped, so an
    /// unclean shutdown can never reuse a stale snapshot.
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing, config.error_if_exists)?;
        let fresh = dir.is_new_store();

        let ledger = TransactionLedger::open(
            Box::new(FileBackend::open(&dir.ledger_path())?),
            config.sync_on_commit,
        )?;

        let records_path = dir.records_path();
        let records = if records_path.exists() {
            SectionFile::open(&records_path, crate::types::SECTION_SIZE)?
        } else {
            SectionFile::create(&records_path, crate::types::SECTION_SIZE)?
        };
        let allocator = SectionAllocator::new(
            Arc::new(records),
            config.format_version,
            config.grow_sections,
        );
        let cache = SectionCache::new(Box::new(FileBackend::open(&dir.cache_path())?));
        if allocator.section_count() == 0 {
            allocator.ensure_bootstrap()?;
        } else {
            let stamp = allocator.cache_stamp()?;
            match cache.load(stamp)? {
                Some(entries) if entries.len() == allocator.section_count() as usize => {
                    allocator.install(&entries)?;
                }
                _ => {
                    if !fresh {
                        warn!(path = %path.display(), "section cache unusable, rescanning");
                    }
                    allocator.rebuild()?;
                }
            }
        }
        allocator.bump_cache_stamp()?;
        allocator.flush()?;
        dir.sync_directory()?;

        info!(path = %path.display(), sections = allocator.section_count(), "opened store");
        Ok(Self {
            dir,
            ledger,
            allocator,
            chase: ChaseRegistry::new(),
            cache: Mutex::new(cache),
            clean_hint: RwLock::new(None),
            blob: RwLock::new(None),
        })
    }

    /// Begins a new transaction.
    pub fn begin(&self, kind: TxKind) -> CoreResult<TransactionView> {
        self.ledger.register(kind)
    }

    /// Finishes a transaction, committing or rolling it back.
    ///
    /// The outcome is recorded in the ledger, the view's held chase
    /// references are released, and its registry bookkeeping is torn down.
    /// A rollback that touched sections invokes the registered clean hint
    /// with them.
    pub fn finish(&self, view: &mut TransactionView, commit: bool) -> CoreResult<()> {
        self.ledger.set_finished(view.id(), commit)?;
        if commit {
            view.mark_committed();
        } else {
            view.mark_rolled_back();
        }
        self.chase.release_held(view);
        self.ledger.unregister(view)?;

        if !commit && !view.touched_sections().is_empty() {
            if let Some(hint) = self.clean_hint.read().as_ref() {
                hint(view.touched_sections());
            }
        }
        Ok(())
    }

    /// Writes a new record into `table` under `view`.
    pub fn write_record(
        &self,
        view: &mut TransactionView,
        table: TableId,
        payload: &[u8],
    ) -> CoreResult<RecordId> {
        self.allocator.write_new_record(view, table, payload, None, false)
    }

    /// Reads a record's payload bytes.
    pub fn read_record(&self, id: RecordId) -> CoreResult<Vec<u8>> {
        self.allocator.read_record(id)
    }

    /// Decides a record's visibility for `view`, given its stored ids.
    pub fn record_visibility(
        &self,
        view: &TransactionView,
        inserter: TxId,
        expirer: TxId,
        mode: ShowMode,
    ) -> CoreResult<Visibility> {
        view.record_visibility(&self.ledger, inserter, expirer, mode)
    }

    /// Tries to claim a record for expiry under `view`.
    pub fn try_expire_record(
        &self,
        view: &mut TransactionView,
        id: RecordId,
    ) -> CoreResult<crate::section::ExpireOutcome> {
        self.allocator
            .try_expire_record(view, &self.ledger, &self.chase, id)
    }

    /// Registers the callback invoked after a rollback that wrote into
    /// sections.
    pub fn set_clean_hint(&self, hint: CleanHint) {
        *self.clean_hint.write() = Some(hint);
    }

    /// Registers the external blob service.
    pub fn set_blob_service(&self, service: Arc<dyn BlobService>) {
        *self.blob.write() = Some(service);
    }

    /// Spills an oversized value to the registered blob service.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when no blob service is registered.
    pub fn spill_to_blob(&self, size: u64, reader: &mut dyn Read) -> CoreResult<BlobId> {
        let blob = self.blob.read();
        let service = blob
            .as_ref()
            .ok_or_else(|| CoreError::invalid_argument("no blob service registered"))?;
        service.store_blob(size, reader)
    }

    /// The transaction ledger.
    #[must_use]
    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// The section allocator.
    #[must_use]
    pub fn allocator(&self) -> &SectionAllocator {
        &self.allocator
    }

    /// The version-chase registry.
    #[must_use]
    pub fn chase(&self) -> &ChaseRegistry {
        &self.chase
    }

    /// The store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Closes the store cleanly: writes the section-cache snapshot and
    /// syncs everything to disk.
    pub fn close(self) -> CoreResult<()> {
        let snapshot = self.allocator.snapshot();
        let stamp = self.allocator.cache_stamp()?;
        self.cache.lock().save(stamp, &snapshot)?;
        self.allocator.flush()?;
        self.ledger.sync()?;
        self.dir.sync_directory()?;
        info!(path = %self.dir.path().display(), "closed store");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.dir.path())
            .field("sections", &self.allocator.section_count())
            .field("registered", &self.ledger.registered_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::ExpireOutcome;
    use crate::types::DATA_BLOCKS;
    use tempfile::tempdir;

    fn open_store(path: &Path) -> Store {
        Store::open(path, &Config::new().grow_sections(2)).unwrap()
    }

    #[test]
    fn open_begin_write_read() {
        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));

        let mut view = store.begin(TxKind::Client).unwrap();
        let id = store.write_record(&mut view, TableId::new(1), b"hello").unwrap();
        assert_eq!(store.read_record(id).unwrap(), b"hello");
        store.finish(&mut view, true).unwrap();
    }

    #[test]
    fn second_open_is_rejected_while_locked() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let _store = open_store(&path);

        let result = Store::open(&path, &Config::new());
        assert!(matches!(result, Err(CoreError::StoreLocked)));
    }

    #[test]
    fn clean_close_and_reopen_through_cache() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let table = TableId::new(3);

        let id = {
            let store = open_store(&path);
            let mut view = store.begin(TxKind::Client).unwrap();
            let id = store.write_record(&mut view, table, b"durable").unwrap();
            store.finish(&mut view, true).unwrap();
            store.close().unwrap();
            id
        };

        let store = open_store(&path);
        assert_eq!(store.read_record(id).unwrap(), b"durable");
        let run = store.allocator().free_summary(table, id.section()).unwrap();
        assert_eq!(run.len, DATA_BLOCKS - 1);
    }

    #[test]
    fn unclean_shutdown_falls_back_to_rescan() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let table = TableId::new(3);

        let id = {
            let store = open_store(&path);
            let mut view = store.begin(TxKind::Client).unwrap();
            let id = store.write_record(&mut view, table, b"still-here").unwrap();
            store.finish(&mut view, true).unwrap();
            store.allocator().flush().unwrap();
            // Dropped without close: no cache snapshot is written.
            id
        };

        let store = open_store(&path);
        assert_eq!(store.read_record(id).unwrap(), b"still-here");
        assert!(store.allocator().free_summary(table, id.section()).is_some());
    }

    #[test]
    fn rollback_invokes_clean_hint_with_touched_sections() {
        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));

        let seen: Arc<Mutex<Vec<SectionId>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.set_clean_hint(Box::new(move |sections| {
            sink.lock().extend_from_slice(sections);
        }));

        let mut view = store.begin(TxKind::Client).unwrap();
        let id = store.write_record(&mut view, TableId::new(1), b"doomed").unwrap();
        store.finish(&mut view, false).unwrap();

        assert_eq!(seen.lock().as_slice(), &[id.section()]);
    }

    #[test]
    fn commit_does_not_invoke_clean_hint() {
        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));

        let seen: Arc<Mutex<Vec<SectionId>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.set_clean_hint(Box::new(move |sections| {
            sink.lock().extend_from_slice(sections);
        }));

        let mut view = store.begin(TxKind::Client).unwrap();
        store.write_record(&mut view, TableId::new(1), b"kept").unwrap();
        store.finish(&mut view, true).unwrap();

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn expire_through_store_facade() {
        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));

        let mut writer = store.begin(TxKind::Client).unwrap();
        let id = store.write_record(&mut writer, TableId::new(1), b"v1").unwrap();
        store.finish(&mut writer, true).unwrap();

        let mut view = store.begin(TxKind::Client).unwrap();
        assert_eq!(
            store.try_expire_record(&mut view, id).unwrap(),
            ExpireOutcome::Claimed
        );
        store.finish(&mut view, false).unwrap();
    }

    #[test]
    fn spill_without_blob_service_fails() {
        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));

        let mut reader = std::io::Cursor::new(vec![0u8; 8]);
        let result = store.spill_to_blob(8, &mut reader);
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn blob_service_is_delegated_to() {
        struct FixedBlobs;
        impl BlobService for FixedBlobs {
            fn store_blob(&self, size: u64, _reader: &mut dyn Read) -> CoreResult<BlobId> {
                Ok(BlobId::new(size))
            }
            fn restore_blob_file(&self, _path: &Path) -> CoreResult<BlobId> {
                Ok(BlobId::new(0))
            }
        }

        let temp = tempdir().unwrap();
        let store = open_store(&temp.path().join("db"));
        store.set_blob_service(Arc::new(FixedBlobs));

        let mut reader = std::io::Cursor::new(vec![0u8; 9]);
        assert_eq!(store.spill_to_blob(9, &mut reader).unwrap(), BlobId::new(9));
    }
}
