//! Section and table allocator: physical record placement.
//!
//! Records live in fixed 64 KiB sections of a memory-mapped file, owned by
//! one table each. Free space is tracked per section as a cached largest
//! free run, authoritative only while the section's updater count is zero.
//!
//! # Lock hierarchy
//!
//! A thread holds at most one table-bucket lock at a time, except the
//! dedicated free-pool lock, which may be taken while a bucket lock is
//! held. Prolog locks are taken only after every bucket lock has been
//! released, and are held only across prolog reads and writes, never
//! across payload I/O.

mod cache;
mod prolog;

pub use cache::{CacheEntry, SectionCache};
pub use prolog::{
    blocks_for, BlockEntry, FreeRun, Prolog, SectionHeader, LENGTH_FREE, LENGTH_INTERIOR,
    PROLOG_SIZE,
};

use crate::chase::ChaseRegistry;
use crate::error::{CoreError, CoreResult};
use crate::ledger::TransactionLedger;
use crate::types::{
    RecordId, SectionId, TableId, TxId, TxStatus, BLOCKS_PER_SECTION, BLOCK_SIZE, DATA_BLOCKS,
    FIRST_DATA_BLOCK, MAX_RECORD_SIZE,
};
use crate::view::TransactionView;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use versodb_storage::SectionFile;

const BUCKET_COUNT: usize = 16;

/// Result of an expire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The caller now owns the record's updater slot.
    Claimed,
    /// A still-running transaction holds the slot; retry or back off
    /// against the given id.
    Busy(TxId),
    /// The record is gone for good and no successor version is recorded.
    Deleted,
    /// The record was superseded; retry against this successor.
    Chase(RecordId),
}

/// Cached free-space summary of one section.
#[derive(Debug, Clone, Copy)]
struct Summary {
    free_pos: u16,
    free_len: u16,
    /// Writers currently holding reserved, unpublished blocks. The free
    /// run above is trusted only at zero.
    updaters: u32,
    /// Generation of the freshest prolog rescan seen for this section.
    scan_gen: u64,
    /// The rescan at `scan_gen`. Published into the free run when the
    /// updater count returns to zero.
    scan_run: FreeRun,
}

type Bucket = HashMap<TableId, HashMap<SectionId, Summary>>;

/// Allocator over the sections of one record file.
pub struct SectionAllocator {
    file: Arc<SectionFile>,
    format_version: u32,
    grow_sections: u32,
    buckets: [Mutex<Bucket>; BUCKET_COUNT],
    /// Sections owned by table 0, fully free.
    free_pool: Mutex<Vec<SectionId>>,
    /// Per-section prolog locks. The guarded value is the section's
    /// rescan generation counter; every rescan captured for publication
    /// bumps it, so concurrent publishers can be ordered afterwards.
    prologs: RwLock<HashMap<SectionId, Arc<Mutex<u64>>>>,
}

impl SectionAllocator {
    /// Creates an allocator over `file` with empty in-memory state.
    ///
    /// Call [`SectionAllocator::rebuild`] or [`SectionAllocator::install`]
    /// before allocating against a non-empty file.
    #[must_use]
    pub fn new(file: Arc<SectionFile>, format_version: u32, grow_sections: u32) -> Self {
        Self {
            file,
            format_version,
            grow_sections: grow_sections.max(1),
            buckets: std::array::from_fn(|_| Mutex::new(HashMap::new())),
            free_pool: Mutex::new(Vec::new()),
            prologs: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds table ownership and free-run summaries by scanning every
    /// section's prolog.
    pub fn rebuild(&self) -> CoreResult<()> {
        for raw in 0..self.file.section_count() {
            let section = SectionId::new(raw);
            let prolog = self.read_prolog(section)?;
            let table = prolog.header().owning_table;
            if table == TableId::FREE_POOL {
                self.free_pool.lock().push(section);
            } else {
                self.insert_summary(table, section, prolog.scan_free_run());
            }
        }
        debug!(sections = self.file.section_count(), "rebuilt section summaries");
        Ok(())
    }

    /// Installs per-section summaries from a cache snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` if the snapshot does not cover exactly the file's
    /// sections.
    pub fn install(&self, entries: &[CacheEntry]) -> CoreResult<()> {
        if entries.len() != self.file.section_count() as usize {
            return Err(CoreError::invalid_format(format!(
                "cache snapshot covers {} sections, file has {}",
                entries.len(),
                self.file.section_count()
            )));
        }
        for (raw, entry) in entries.iter().enumerate() {
            let section = SectionId::new(raw as u32);
            if entry.table == TableId::FREE_POOL {
                self.free_pool.lock().push(section);
            } else {
                self.insert_summary(entry.table, section, entry.free_run);
            }
        }
        Ok(())
    }

    /// Snapshots every section's table and free run, indexed by section.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries = vec![
            CacheEntry {
                table: TableId::FREE_POOL,
                free_run: FreeRun::FULL,
            };
            self.file.section_count() as usize
        ];
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            for (&table, sections) in bucket.iter() {
                for (&section, summary) in sections {
                    entries[section.as_u32() as usize] = CacheEntry {
                        table,
                        free_run: FreeRun {
                            pos: summary.free_pos,
                            len: summary.free_len,
                        },
                    };
                }
            }
        }
        entries
    }

    /// Makes sure the file holds at least one section, so the cache stamp
    /// in section 0's header always exists.
    pub fn ensure_bootstrap(&self) -> CoreResult<()> {
        if self.file.section_count() == 0 {
            let first = self.file.grow(self.grow_sections)?;
            let mut pool = self.free_pool.lock();
            for i in 0..self.grow_sections {
                pool.push(SectionId::new(first + i));
            }
        }
        Ok(())
    }

    /// Reads the cache stamp from section 0's header.
    pub fn cache_stamp(&self) -> CoreResult<u32> {
        let section = SectionId::new(0);
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();
        Ok(self.read_prolog(section)?.header().cache_stamp)
    }

    /// Increments the cache stamp in section 0's header and returns the
    /// new value.
    pub fn bump_cache_stamp(&self) -> CoreResult<u32> {
        let section = SectionId::new(0);
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();
        let mut prolog = self.read_prolog(section)?;
        let mut header = prolog.header();
        header.cache_stamp = header.cache_stamp.wrapping_add(1);
        prolog.set_header(&header);
        self.write_prolog(section, &prolog)?;
        Ok(header.cache_stamp)
    }

    /// Writes a new record and returns its id.
    ///
    /// The four-phase protocol:
    ///
    /// 1. Under the table's bucket lock: pick a section (hint, then scan,
    ///    then free pool or file growth), shrink its free run by the
    ///    record's block count and raise its updater count.
    /// 2. With no lock held: write the payload into the reserved blocks.
    ///    No reader can reach them, they are not yet published.
    /// 3. Under the section's prolog lock: publish the block entries,
    ///    rescan the section's free run and stamp the rescan with the
    ///    section's next generation.
    /// 4. Under the bucket lock again: drop the updater count and record
    ///    the stamped rescan if it is the freshest seen. The writer whose
    ///    decrement reaches zero publishes that freshest rescan, which
    ///    may be another writer's, never an outdated one.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty payload or a write into the free
    /// pool, `RecordTooLarge` past [`MAX_RECORD_SIZE`]; neither allocates.
    pub fn write_new_record(
        &self,
        view: &mut TransactionView,
        table: TableId,
        payload: &[u8],
        hint: Option<SectionId>,
        force_new_section: bool,
    ) -> CoreResult<RecordId> {
        if table == TableId::FREE_POOL {
            return Err(CoreError::invalid_argument(
                "records cannot be written into the free pool",
            ));
        }
        if payload.is_empty() {
            return Err(CoreError::invalid_argument("empty record payload"));
        }
        if payload.len() > MAX_RECORD_SIZE {
            return Err(CoreError::RecordTooLarge {
                size: payload.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        let blocks = blocks_for(payload.len());

        // Phase 1: reserve.
        let (section, pos) = {
            let mut bucket = self.bucket_of(table).lock();
            let sections = bucket.entry(table).or_default();

            let mut found = None;
            if !force_new_section {
                if let Some(hinted) = hint {
                    if sections.get(&hinted).is_some_and(|s| s.free_len >= blocks) {
                        found = Some(hinted);
                    }
                }
                if found.is_none() {
                    found = sections
                        .iter()
                        .find(|(_, s)| s.free_len >= blocks)
                        .map(|(&id, _)| id);
                }
            }
            let section = match found {
                Some(section) => section,
                None => {
                    let fresh = self.take_free_section()?;
                    sections.insert(
                        fresh,
                        Summary {
                            free_pos: FIRST_DATA_BLOCK,
                            free_len: DATA_BLOCKS,
                            updaters: 0,
                            scan_gen: 0,
                            scan_run: FreeRun::FULL,
                        },
                    );
                    fresh
                }
            };

            let summary = sections
                .get_mut(&section)
                .ok_or_else(|| CoreError::internal(format!("reserved section {section} vanished")))?;
            let pos = summary.free_pos;
            summary.free_pos += blocks;
            summary.free_len -= blocks;
            summary.updaters += 1;
            (section, pos)
        };

        // Phase 2: unlocked payload write into unpublished blocks.
        self.file
            .write(section.as_u32(), pos as usize * BLOCK_SIZE, payload)?;

        // Phase 3: publish under the prolog lock.
        let (gen, rescan) = {
            let lock = self.prolog_lock(section);
            let mut gen = lock.lock();
            let mut prolog = self.read_prolog(section)?;

            let header = prolog.header();
            if header.owning_table != table {
                prolog.set_header(&SectionHeader::new(
                    table,
                    self.format_version,
                    header.cache_stamp,
                ));
            }
            prolog.set_entry(
                pos,
                &BlockEntry {
                    length: payload.len() as u16,
                    inserter: view.id(),
                    updater: TxId::NEVER_COMMITTED,
                },
            )?;
            for block in pos + 1..pos + blocks {
                prolog.set_entry(
                    block,
                    &BlockEntry {
                        length: LENGTH_INTERIOR,
                        inserter: view.id(),
                        updater: TxId::NEVER_COMMITTED,
                    },
                )?;
            }
            self.write_prolog(section, &prolog)?;
            *gen += 1;
            (*gen, prolog.scan_free_run())
        };

        // Phase 4: republish the free run when we are the last writer out.
        self.republish(table, section, gen, rescan);

        view.record_touched_section(section);
        trace!(%section, block = pos, len = payload.len(), "wrote record");
        RecordId::new(section, pos)
    }

    /// Reads a record's payload bytes.
    pub fn read_record(&self, id: RecordId) -> CoreResult<Vec<u8>> {
        let section = id.section();
        self.check_section(section)?;

        let length = {
            let lock = self.prolog_lock(section);
            let _guard = lock.lock();
            let entry = self.read_prolog(section)?.entry(id.block())?;
            if !entry.is_record_head() {
                return Err(CoreError::internal(format!("no record at {id}")));
            }
            entry.length
        };

        // The payload of a published record is immutable; no lock needed.
        self.file.read(
            section.as_u32(),
            id.block() as usize * BLOCK_SIZE,
            length as usize,
        )
        .map_err(CoreError::from)
    }

    /// Reads a record's prolog metadata.
    pub fn record_header(&self, id: RecordId) -> CoreResult<(u16, TxId, TxId)> {
        let section = id.section();
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();

        let entry = self.read_prolog(section)?.entry(id.block())?;
        if !entry.is_record_head() {
            return Err(CoreError::internal(format!("no record at {id}")));
        }
        Ok((entry.length, entry.inserter, entry.updater))
    }

    /// Destroys a record, freeing its blocks.
    ///
    /// A section left fully empty (with no writer mid-flight) moves back
    /// to the free pool, its header owner rewritten to table 0.
    pub fn destroy_record(&self, id: RecordId) -> CoreResult<()> {
        let section = id.section();
        self.check_section(section)?;

        let (owner, gen, rescan) = {
            let lock = self.prolog_lock(section);
            let mut gen = lock.lock();
            let mut prolog = self.read_prolog(section)?;

            let owner = prolog.header().owning_table;
            if owner == TableId::FREE_POOL {
                return Err(CoreError::internal(format!(
                    "destroy of {id} in a free-pool section"
                )));
            }
            let entry = prolog.entry(id.block())?;
            if !entry.is_record_head() {
                return Err(CoreError::internal(format!("destroy of non-record {id}")));
            }

            let blocks = blocks_for(entry.length as usize);
            for block in id.block()..id.block() + blocks {
                prolog.clear_entry(block)?;
            }
            let rescan = prolog.scan_free_run();
            if rescan.is_full() {
                let mut header = prolog.header();
                header.owning_table = TableId::FREE_POOL;
                prolog.set_header(&header);
            }
            self.write_prolog(section, &prolog)?;
            *gen += 1;
            (owner, *gen, rescan)
        };

        let mut bucket = self.bucket_of(owner).lock();
        if let Some(sections) = bucket.get_mut(&owner) {
            if let Some(summary) = sections.get_mut(&section) {
                // A newer rescan means a later writer allocated here; it
                // owns the publish and the section cannot be empty.
                if gen > summary.scan_gen {
                    summary.scan_gen = gen;
                    summary.scan_run = rescan;
                    if summary.updaters == 0 {
                        summary.free_pos = rescan.pos;
                        summary.free_len = rescan.len;
                        if rescan.is_full() {
                            sections.remove(&section);
                            self.free_pool.lock().push(section);
                            debug!(%section, table = %owner, "returned empty section to pool");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Tries to claim a record's updater slot for expiry.
    ///
    /// A foreign updater is resolved through the raw ledger, outside the
    /// prolog lock and with no snapshot override: the claim race is about
    /// physical ownership, not the caller's view.
    pub fn try_expire_record(
        &self,
        view: &mut TransactionView,
        ledger: &TransactionLedger,
        chase: &ChaseRegistry,
        id: RecordId,
    ) -> CoreResult<ExpireOutcome> {
        enum Step {
            Claimed,
            Superseded,
            Foreign(TxId),
        }

        let section = id.section();
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let mut known_rolled_back: Option<TxId> = None;

        loop {
            let step = {
                let _guard = lock.lock();
                let mut prolog = self.read_prolog(section)?;
                let entry = prolog.entry(id.block())?;
                if !entry.is_record_head() {
                    return Err(CoreError::internal(format!("expire of non-record {id}")));
                }

                if entry.updater == view.id() {
                    Step::Claimed
                } else if entry.updater == TxId::NEVER_COMMITTED
                    || known_rolled_back == Some(entry.updater)
                {
                    prolog.set_entry(
                        id.block(),
                        &BlockEntry {
                            updater: view.id(),
                            ..entry
                        },
                    )?;
                    self.write_prolog(section, &prolog)?;
                    Step::Claimed
                } else if entry.updater == TxId::ALWAYS_COMMITTED {
                    Step::Superseded
                } else {
                    Step::Foreign(entry.updater)
                }
            };

            match step {
                Step::Claimed => {
                    view.record_touched_section(section);
                    return Ok(ExpireOutcome::Claimed);
                }
                Step::Superseded => {
                    return Ok(match chase.chase_next_version(view, id, true) {
                        Some(next) => ExpireOutcome::Chase(next),
                        None => ExpireOutcome::Deleted,
                    });
                }
                Step::Foreign(holder) => {
                    let (status, _) = ledger.status(holder)?;
                    match status {
                        TxStatus::Busy => return Ok(ExpireOutcome::Busy(holder)),
                        s if s.is_committed() => {
                            return Ok(match chase.chase_next_version(view, id, true) {
                                Some(next) => ExpireOutcome::Chase(next),
                                None => ExpireOutcome::Deleted,
                            });
                        }
                        // Rolled back: reclaim the slot, re-verifying the
                        // holder did not change while the lock was dropped.
                        _ => known_rolled_back = Some(holder),
                    }
                }
            }
        }
    }

    /// Reverts a claim made by `view` back to unset.
    ///
    /// # Errors
    ///
    /// `ForeignClaim` if the slot is held by anyone else; that is a logic
    /// error in the caller, not contention.
    pub fn unexpire_record(&self, view: &TransactionView, id: RecordId) -> CoreResult<()> {
        let section = id.section();
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();

        let mut prolog = self.read_prolog(section)?;
        let entry = prolog.entry(id.block())?;
        if !entry.is_record_head() {
            return Err(CoreError::internal(format!("unexpire of non-record {id}")));
        }
        if entry.updater != view.id() {
            return Err(CoreError::ForeignClaim {
                record: id,
                holder: entry.updater,
            });
        }

        prolog.set_entry(
            id.block(),
            &BlockEntry {
                updater: TxId::NEVER_COMMITTED,
                ..entry
            },
        )?;
        self.write_prolog(section, &prolog)
    }

    /// Rewrites a record's inserter and updater metadata.
    ///
    /// This is the memoization write-back path: visibility callers and the
    /// janitor use it to pin permanent outcomes as sentinels.
    pub fn set_record_ids(&self, id: RecordId, inserter: TxId, updater: TxId) -> CoreResult<()> {
        let section = id.section();
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();

        let mut prolog = self.read_prolog(section)?;
        let entry = prolog.entry(id.block())?;
        if !entry.is_record_head() {
            return Err(CoreError::internal(format!("id rewrite of non-record {id}")));
        }

        prolog.set_entry(
            id.block(),
            &BlockEntry {
                length: entry.length,
                inserter,
                updater,
            },
        )?;
        let blocks = blocks_for(entry.length as usize);
        for block in id.block() + 1..id.block() + blocks {
            let interior = prolog.entry(block)?;
            prolog.set_entry(block, &BlockEntry { inserter, ..interior })?;
        }
        self.write_prolog(section, &prolog)
    }

    /// Rewrites every id of a retiring range in one section's prolog to
    /// its terminal sentinel.
    ///
    /// Returns the records left permanently dead (never inserted, or both
    /// sides permanently committed) for the caller to destroy.
    ///
    /// # Errors
    ///
    /// `Internal` if a retiring-range id is still running, or if the
    /// section is not owned by `table`.
    pub fn clear_obsolete_transactions(
        &self,
        ledger: &TransactionLedger,
        table: TableId,
        range: u8,
        section: SectionId,
    ) -> CoreResult<Vec<RecordId>> {
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();

        let mut prolog = self.read_prolog(section)?;
        let owner = prolog.header().owning_table;
        if owner != table {
            return Err(CoreError::internal(format!(
                "{section} owned by {owner}, expected {table}"
            )));
        }

        let mut dead = Vec::new();
        for block in FIRST_DATA_BLOCK..BLOCKS_PER_SECTION {
            let mut entry = prolog.entry(block)?;
            if entry.is_free() {
                continue;
            }

            let mut changed = false;
            if !entry.inserter.is_sentinel() && entry.inserter.range() == range {
                entry.inserter = Self::terminal_sentinel(ledger, entry.inserter)?;
                changed = true;
            }
            if !entry.updater.is_sentinel() && entry.updater.range() == range {
                entry.updater = Self::terminal_sentinel(ledger, entry.updater)?;
                changed = true;
            }
            if changed {
                prolog.set_entry(block, &entry)?;
            }

            if entry.is_record_head()
                && (entry.inserter == TxId::NEVER_COMMITTED
                    || (entry.inserter == TxId::ALWAYS_COMMITTED
                        && entry.updater == TxId::ALWAYS_COMMITTED))
            {
                dead.push(RecordId::new(section, block)?);
            }
        }

        self.write_prolog(section, &prolog)?;
        Ok(dead)
    }

    /// Lists every live record head in one section with its metadata ids.
    pub fn record_heads(&self, section: SectionId) -> CoreResult<Vec<(RecordId, TxId, TxId)>> {
        self.check_section(section)?;
        let lock = self.prolog_lock(section);
        let _guard = lock.lock();

        let prolog = self.read_prolog(section)?;
        let mut heads = Vec::new();
        for block in FIRST_DATA_BLOCK..BLOCKS_PER_SECTION {
            let entry = prolog.entry(block)?;
            if entry.is_record_head() {
                heads.push((RecordId::new(section, block)?, entry.inserter, entry.updater));
            }
        }
        Ok(heads)
    }

    /// Lists every table and its sections.
    #[must_use]
    pub fn tables(&self) -> Vec<(TableId, Vec<SectionId>)> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            for (&table, sections) in bucket.iter() {
                let mut ids: Vec<SectionId> = sections.keys().copied().collect();
                ids.sort_unstable();
                out.push((table, ids));
            }
        }
        out.sort_unstable_by_key(|(table, _)| *table);
        out
    }

    /// The published free run of one section, if the table owns it.
    #[must_use]
    pub fn free_summary(&self, table: TableId, section: SectionId) -> Option<FreeRun> {
        let bucket = self.bucket_of(table).lock();
        let summary = bucket.get(&table)?.get(&section)?;
        Some(FreeRun {
            pos: summary.free_pos,
            len: summary.free_len,
        })
    }

    /// Number of sections in the free pool.
    #[must_use]
    pub fn free_pool_len(&self) -> usize {
        self.free_pool.lock().len()
    }

    /// Number of sections in the file.
    #[must_use]
    pub fn section_count(&self) -> u32 {
        self.file.section_count()
    }

    /// Flushes the record file.
    pub fn flush(&self) -> CoreResult<()> {
        self.file.flush().map_err(CoreError::from)
    }

    fn terminal_sentinel(ledger: &TransactionLedger, id: TxId) -> CoreResult<TxId> {
        let (status, _) = ledger.status(id)?;
        match status {
            TxStatus::Busy => Err(CoreError::internal(format!(
                "{id} still running in its retiring range"
            ))),
            s if s.is_committed() => Ok(TxId::ALWAYS_COMMITTED),
            _ => Ok(TxId::NEVER_COMMITTED),
        }
    }

    fn republish(&self, table: TableId, section: SectionId, gen: u64, rescan: FreeRun) {
        let mut bucket = self.bucket_of(table).lock();
        if let Some(summary) = bucket.get_mut(&table).and_then(|m| m.get_mut(&section)) {
            summary.updaters -= 1;
            if gen > summary.scan_gen {
                summary.scan_gen = gen;
                summary.scan_run = rescan;
            }
            if summary.updaters == 0 {
                // Every reservation has published by now, and the highest
                // generation saw all of them, so this run can never cover
                // an occupied block.
                summary.free_pos = summary.scan_run.pos;
                summary.free_len = summary.scan_run.len;
            }
        }
    }

    fn insert_summary(&self, table: TableId, section: SectionId, run: FreeRun) {
        let mut bucket = self.bucket_of(table).lock();
        bucket.entry(table).or_default().insert(
            section,
            Summary {
                free_pos: run.pos,
                free_len: run.len,
                updaters: 0,
                scan_gen: 0,
                scan_run: run,
            },
        );
    }

    /// Pops a pool section, growing the file when the pool is empty. The
    /// free-pool lock may be taken while a bucket lock is held.
    fn take_free_section(&self) -> CoreResult<SectionId> {
        let mut pool = self.free_pool.lock();
        if let Some(section) = pool.pop() {
            return Ok(section);
        }
        let first = self.file.grow(self.grow_sections)?;
        for i in 1..self.grow_sections {
            pool.push(SectionId::new(first + i));
        }
        Ok(SectionId::new(first))
    }

    fn bucket_of(&self, table: TableId) -> &Mutex<Bucket> {
        &self.buckets[table.as_u32() as usize % BUCKET_COUNT]
    }

    fn prolog_lock(&self, section: SectionId) -> Arc<Mutex<u64>> {
        if let Some(lock) = self.prologs.read().get(&section) {
            return Arc::clone(lock);
        }
        Arc::clone(self.prologs.write().entry(section).or_default())
    }

    fn read_prolog(&self, section: SectionId) -> CoreResult<Prolog> {
        Prolog::from_bytes(self.file.read(section.as_u32(), 0, PROLOG_SIZE)?)
    }

    fn write_prolog(&self, section: SectionId, prolog: &Prolog) -> CoreResult<()> {
        self.file
            .write(section.as_u32(), 0, prolog.bytes())
            .map_err(CoreError::from)
    }

    fn check_section(&self, section: SectionId) -> CoreResult<()> {
        if section.as_u32() >= self.file.section_count() {
            return Err(CoreError::internal(format!(
                "missing {section} for record access"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SectionAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionAllocator")
            .field("sections", &self.file.section_count())
            .field("free_pool", &self.free_pool.lock().len())
            .finish_non_exhaustive()
    }
}
