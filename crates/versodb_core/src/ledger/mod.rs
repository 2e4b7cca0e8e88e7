//! Transaction ledger: durable commit outcomes plus live-registry bookkeeping.

mod file;
mod registry;

pub(crate) use file::{range_end, range_first};
pub use file::LEDGER_VERSION;

use crate::error::{CoreError, CoreResult};
use crate::types::{TxId, TxStatus, RANGE_COUNT, RANGE_SWITCH_HEADROOM, RESERVATION_BATCH};
use crate::view::{TransactionView, TxKind};
use file::LedgerFile;
use parking_lot::Mutex;
use registry::Registry;
use tracing::debug;
use versodb_storage::StorageBackend;

/// The transaction ledger.
///
/// Records every transaction's commit/rollback outcome as one durable bit,
/// keyed by id across four recycling id ranges, and tracks which ids are
/// still live or remembered by live transactions.
///
/// All state sits behind one internal mutex, which makes registration and
/// unregistration a global synchronization point. That bottleneck is part
/// of the design; callers hold the lock only for short, bounded work.
pub struct TransactionLedger {
    inner: Mutex<Inner>,
}

struct Inner {
    file: LedgerFile,
    registry: Registry,
    /// Last id actually issued, per range.
    issued: [u32; RANGE_COUNT as usize],
    /// Highest id whose bitmap page is reserved and persisted, per range.
    reserved: [u32; RANGE_COUNT as usize],
    sync_on_commit: bool,
}

impl TransactionLedger {
    /// Opens the ledger over a byte store, initializing it when empty.
    ///
    /// After a crash, issuance resumes from the persisted last-used
    /// watermark; ids inside an unfinished reservation batch are skipped
    /// and read as rolled back forever.
    pub fn open(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> CoreResult<Self> {
        let file = LedgerFile::open(backend)?;
        let mut issued = [0u32; RANGE_COUNT as usize];
        for (range, slot) in issued.iter_mut().enumerate() {
            *slot = file.last_used(range as u8);
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                registry: Registry::default(),
                issued,
                reserved: issued,
                sync_on_commit,
            }),
        })
    }

    /// Resolves the status of a transaction id.
    ///
    /// The second value is the sentinel equivalent when the outcome has
    /// become permanent for all observers: callers use it to rewrite
    /// stored record metadata so future checks skip the ledger.
    pub fn status(&self, id: TxId) -> CoreResult<(TxStatus, Option<TxId>)> {
        if id == TxId::ALWAYS_COMMITTED {
            return Ok((TxStatus::GlobalCommitted, None));
        }
        if id == TxId::NEVER_COMMITTED {
            return Ok((TxStatus::GlobalRolledBack, None));
        }

        let inner = self.inner.lock();
        Self::status_locked(&inner, id)
    }

    fn status_locked(inner: &Inner, id: TxId) -> CoreResult<(TxStatus, Option<TxId>)> {
        if inner.registry.is_running(id) {
            return Ok((TxStatus::Busy, None));
        }

        if inner.file.commit_bit(id)? {
            // Committed becomes permanent once no still-relevant transaction
            // could order against it.
            let permanent = match inner.registry.lowest_referred(id.range()) {
                None => true,
                Some(low) => id < low,
            };
            if permanent {
                Ok((TxStatus::GlobalCommitted, Some(TxId::ALWAYS_COMMITTED)))
            } else {
                Ok((TxStatus::LocalCommitted, None))
            }
        } else if inner.registry.is_live(id) {
            // Finished without commit but the transaction object still
            // exists; only it could ever have seen its own writes.
            Ok((TxStatus::LocalRolledBack, None))
        } else {
            Ok((TxStatus::GlobalRolledBack, Some(TxId::NEVER_COMMITTED)))
        }
    }

    /// Registers a new transaction, assigning the next sequential id from
    /// the current range and snapshotting every currently-running id.
    ///
    /// # Errors
    ///
    /// - `RangeExhausted` for a client transaction once the current range
    ///   is within its switching headroom; no id is issued.
    /// - `Internal` if the range is truly out of ids.
    pub fn register(&self, kind: TxKind) -> CoreResult<TransactionView> {
        let mut inner = self.inner.lock();

        let range = inner.file.current_range();
        let next = u64::from(inner.issued[range as usize]) + 1;
        let end = range_end(range);

        if next >= end {
            return Err(CoreError::internal(format!("range {range} fully exhausted")));
        }
        let remaining = end - next;
        if kind == TxKind::Client && remaining < u64::from(RANGE_SWITCH_HEADROOM) {
            return Err(CoreError::RangeExhausted {
                range,
                remaining: remaining as u32,
            });
        }

        let id = TxId::new(next as u32);
        if id.as_u32() > inner.reserved[range as usize] {
            let watermark =
                (next + u64::from(RESERVATION_BATCH) - 1).min(end - 1) as u32;
            inner.file.ensure_pages_for(TxId::new(watermark))?;
            inner.file.set_last_used(range, watermark)?;
            inner.file.sync()?;
            inner.reserved[range as usize] = watermark;
        }
        inner.issued[range as usize] = id.as_u32();

        let earlier = inner.registry.committable_ids();
        for &other in &earlier {
            inner.registry.add_ref(other)?;
        }
        inner.registry.insert_new(id, earlier.clone());

        Ok(TransactionView::new(id, kind, earlier))
    }

    /// Records a transaction's terminal outcome.
    ///
    /// A commit writes the durable bit (and syncs when configured); either
    /// way the id stops being committable. One-shot: a second finish is an
    /// `Internal` error.
    pub fn set_finished(&self, id: TxId, commit: bool) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.registry.set_finished(id)?;
        if commit {
            inner.file.set_commit_bit(id)?;
            if inner.sync_on_commit {
                inner.file.sync()?;
            }
        }
        Ok(())
    }

    /// Releases a finished view's registry bookkeeping.
    ///
    /// Every id on the view's earlier-running snapshot loses one
    /// reference, entries reaching zero cascade out, and the per-range
    /// lowest-referred summaries are recomputed.
    pub fn unregister(&self, view: &TransactionView) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.registry.unregister(view.id())
    }

    /// Switches id issuance to the next range.
    ///
    /// # Errors
    ///
    /// `Internal` if either the outgoing or the incoming range is still
    /// referenced by any live or remembered transaction.
    pub fn switch_to_next_range(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let current = inner.file.current_range();
        let next = (current + 1) % RANGE_COUNT as u8;

        if inner.registry.any_referred_in_range(current) {
            return Err(CoreError::internal(format!(
                "range switch while outgoing range {current} is referenced"
            )));
        }
        if inner.registry.any_referred_in_range(next) {
            return Err(CoreError::internal(format!(
                "range switch while incoming range {next} is referenced"
            )));
        }

        inner.file.set_current_range(next)?;
        inner.file.sync()?;
        debug!(from = current, to = next, "switched transaction id range");
        Ok(())
    }

    /// Clears a range for reuse: zeroes its bitmap pages and resets its
    /// last-used id to the range's first id.
    ///
    /// # Errors
    ///
    /// `Internal` if the range is referenced by any live or remembered
    /// transaction.
    pub fn clear_range(&self, range: u8) -> CoreResult<()> {
        if u32::from(range) >= RANGE_COUNT {
            return Err(CoreError::invalid_argument(format!(
                "range {range} out of bounds"
            )));
        }
        let mut inner = self.inner.lock();
        if inner.registry.any_referred_in_range(range) {
            return Err(CoreError::internal(format!(
                "clear of referenced range {range}"
            )));
        }

        inner.file.clear_range_pages(range)?;
        let first = range_first(range);
        inner.file.set_last_used(range, first)?;
        inner.issued[range as usize] = first;
        inner.reserved[range as usize] = first;
        inner.file.sync()?;
        debug!(range, "cleared transaction id range");
        Ok(())
    }

    /// Pair-permanence test for two resolved non-sentinel ids.
    ///
    /// Decides whether the visibility verdict derived from `a` and `b`
    /// can never change for any observer, past or future.
    pub fn is_visibility_nontrivial_permanent(&self, a: TxId, b: TxId) -> CoreResult<bool> {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        let inner = self.inner.lock();

        if a == b {
            return Ok(!inner.registry.is_live(a));
        }

        let bit_a = inner.file.commit_bit(a)?;
        let bit_b = inner.file.commit_bit(b)?;
        if bit_a != bit_b {
            return Ok(false);
        }

        if !bit_a {
            // Both uncommitted: permanent once neither transaction exists.
            return Ok(!inner.registry.is_live(a) && !inner.registry.is_live(b));
        }

        // Both committed: an id between them could have observed the two
        // as ordered differently, and cross-range permanence is never
        // attempted.
        Ok(a.range() == b.range() && !inner.registry.any_referred_in(a, b))
    }

    /// Whether the current range has entered its switching headroom, so a
    /// range switch is due.
    pub fn in_switch_headroom(&self) -> bool {
        let inner = self.inner.lock();
        let range = inner.file.current_range();
        let next = u64::from(inner.issued[range as usize]) + 1;
        range_end(range).saturating_sub(next) < u64::from(RANGE_SWITCH_HEADROOM)
    }

    /// Current range index.
    pub fn current_range(&self) -> u8 {
        self.inner.lock().file.current_range()
    }

    /// Number of live plus remembered registry entries.
    pub fn registered_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Syncs all ledger state to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.inner.lock().file.sync()
    }

    /// Forces the issuance cursor for a range, pre-reserving the rest of
    /// the range so no bitmap extension is triggered.
    #[cfg(test)]
    pub(crate) fn force_issued(&self, range: u8, id: u32) {
        let mut inner = self.inner.lock();
        inner.issued[range as usize] = id;
        inner.reserved[range as usize] = (range_end(range) - 1) as u32;
    }
}

impl std::fmt::Debug for TransactionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TransactionLedger")
            .field("current_range", &inner.file.current_range())
            .field("registered", &inner.registry.len())
            .finish_non_exhaustive()
    }
}
