//! Transaction views and the record visibility engine.

use crate::error::CoreResult;
use crate::ledger::TransactionLedger;
use crate::types::{RecordId, SectionId, TxId, TxStatus, RANGE_COUNT};

/// What kind of transaction is registering.
///
/// System transactions (janitor work) may use the id headroom that client
/// transactions are locked out of near the end of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Ordinary client transaction.
    Client,
    /// Internal maintenance transaction.
    System,
}

/// Terminal state machine of a view. One-shot: once committed or rolled
/// back, a view never changes state again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Still running.
    Busy,
    /// Reported commit to the ledger.
    Committed,
    /// Reported rollback to the ledger.
    RolledBack,
}

/// How much concurrent activity an observer is willing to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowMode {
    /// Snapshot isolation: transactions parallel to the observer read as
    /// rolled back even if the ledger shows them committed.
    Snapshot,
    /// See every committed transaction, concurrent or not.
    AfterCommit,
}

/// The visibility verdict for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// Whether the observer sees the record.
    pub visible: bool,
    /// Inserter id to write back into the record's metadata (a sentinel
    /// once the inserter's fate is permanent).
    pub inserter: TxId,
    /// Expirer id to write back into the record's metadata.
    pub expirer: TxId,
    /// The record can never become visible to any observer again; a hint
    /// for garbage collection.
    pub permanently_invisible: bool,
}

/// A transaction's private view of the store.
///
/// Owns one transaction id and the immutable snapshot of ids that were
/// running when it registered. All visibility decisions for this
/// transaction are made relative to that snapshot.
#[derive(Debug)]
pub struct TransactionView {
    id: TxId,
    kind: TxKind,
    /// Ids running at registration, sorted ascending. Never changes for
    /// the life of the view.
    earlier: Vec<TxId>,
    state: ViewState,
    /// Chase-chain links this view holds references on.
    held_chases: Vec<RecordId>,
    /// Sections this view wrote into; feeds the rollback clean hint.
    touched_sections: Vec<SectionId>,
}

impl TransactionView {
    pub(crate) fn new(id: TxId, kind: TxKind, earlier: Vec<TxId>) -> Self {
        debug_assert!(earlier.windows(2).all(|w| w[0] < w[1]));
        Self {
            id,
            kind,
            earlier,
            state: ViewState::Busy,
            held_chases: Vec::new(),
            touched_sections: Vec::new(),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Returns the transaction kind.
    #[must_use]
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Checks whether the view is still busy.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state == ViewState::Busy
    }

    /// The earlier-running snapshot, sorted ascending.
    #[must_use]
    pub fn earlier_running(&self) -> &[TxId] {
        &self.earlier
    }

    /// Marks the view committed.
    pub(crate) fn mark_committed(&mut self) {
        debug_assert!(self.is_busy());
        self.state = ViewState::Committed;
    }

    /// Marks the view rolled back.
    pub(crate) fn mark_rolled_back(&mut self) {
        debug_assert!(self.is_busy());
        self.state = ViewState::RolledBack;
    }

    /// Records that this view wrote into a section.
    pub(crate) fn record_touched_section(&mut self, section: SectionId) {
        if !self.touched_sections.contains(&section) {
            self.touched_sections.push(section);
        }
    }

    /// Sections this view wrote into.
    #[must_use]
    pub fn touched_sections(&self) -> &[SectionId] {
        &self.touched_sections
    }

    /// Records a chase link this view holds a reference on.
    pub(crate) fn add_held_chase(&mut self, id: RecordId) {
        self.held_chases.push(id);
    }

    /// Takes the held chase links for release at teardown.
    pub(crate) fn take_held_chases(&mut self) -> Vec<RecordId> {
        std::mem::take(&mut self.held_chases)
    }

    /// Whether `other` is parallel to this view under snapshot isolation:
    /// started after it in the same range, started in the range
    /// immediately following its range, or present on its earlier-running
    /// snapshot.
    #[must_use]
    pub fn is_parallel(&self, other: TxId) -> bool {
        let my_range = self.id.range();
        let other_range = other.range();

        (other_range == my_range && other > self.id)
            || other_range == (my_range + 1) % RANGE_COUNT as u8
            || self.earlier.binary_search(&other).is_ok()
    }

    /// Resolves an id's status as seen by this view.
    ///
    /// Wraps the ledger's status with the snapshot-isolation override:
    /// under [`ShowMode::Snapshot`], a parallel id is forced to read as
    /// locally rolled back even if the ledger shows it committed - this
    /// is what keeps a transaction's view of concurrent activity fixed.
    /// The view's own id reads as locally committed.
    pub fn trans_status(
        &self,
        ledger: &TransactionLedger,
        id: TxId,
        mode: ShowMode,
    ) -> CoreResult<(TxStatus, Option<TxId>)> {
        if id == self.id {
            return Ok((TxStatus::LocalCommitted, None));
        }
        if !id.is_sentinel() && mode == ShowMode::Snapshot && self.is_parallel(id) {
            return Ok((TxStatus::LocalRolledBack, None));
        }
        ledger.status(id)
    }

    /// Decides whether a record is visible to this view.
    ///
    /// `inserter` and `expirer` are the ids stored in the record's
    /// metadata. The returned [`Visibility`] carries the ids to write
    /// back: sentinels once an outcome has become permanent, so future
    /// checks against this record skip the ledger entirely.
    pub fn record_visibility(
        &self,
        ledger: &TransactionLedger,
        inserter: TxId,
        expirer: TxId,
        mode: ShowMode,
    ) -> CoreResult<Visibility> {
        // Fast paths on already-memoized metadata.
        if inserter == TxId::NEVER_COMMITTED {
            return Ok(Visibility {
                visible: false,
                inserter,
                expirer,
                permanently_invisible: true,
            });
        }
        if expirer == TxId::ALWAYS_COMMITTED {
            return Ok(Visibility {
                visible: false,
                inserter,
                expirer,
                permanently_invisible: true,
            });
        }
        if inserter == TxId::ALWAYS_COMMITTED && expirer == TxId::NEVER_COMMITTED {
            return Ok(Visibility {
                visible: true,
                inserter,
                expirer,
                permanently_invisible: false,
            });
        }

        let (ins_status, ins_equiv) = self.trans_status(ledger, inserter, mode)?;
        let (exp_status, exp_equiv) = self.trans_status(ledger, expirer, mode)?;

        // A real pair whose statuses agree may be provably settled: the
        // record is then invisible to every observer, forever, and its
        // metadata collapses to the always-committed pair.
        if !inserter.is_sentinel()
            && !expirer.is_sentinel()
            && ins_status != TxStatus::Busy
            && exp_status != TxStatus::Busy
            && ins_status.is_committed() == exp_status.is_committed()
            && ledger.is_visibility_nontrivial_permanent(inserter, expirer)?
        {
            return Ok(Visibility {
                visible: false,
                inserter: TxId::ALWAYS_COMMITTED,
                expirer: TxId::ALWAYS_COMMITTED,
                permanently_invisible: true,
            });
        }

        Ok(Visibility {
            visible: ins_status.is_committed() && !exp_status.is_committed(),
            inserter: ins_equiv.unwrap_or(inserter),
            expirer: exp_equiv.unwrap_or(expirer),
            permanently_invisible: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RANGE_SIZE;
    use versodb_storage::InMemoryBackend;

    fn create_ledger() -> TransactionLedger {
        TransactionLedger::open(Box::new(InMemoryBackend::new()), true).unwrap()
    }

    fn finish(ledger: &TransactionLedger, view: &mut TransactionView, commit: bool) {
        ledger.set_finished(view.id(), commit).unwrap();
        if commit {
            view.mark_committed();
        } else {
            view.mark_rolled_back();
        }
        ledger.unregister(view).unwrap();
    }

    #[test]
    fn state_machine_is_one_shot() {
        let mut view = TransactionView::new(TxId::new(1), TxKind::Client, Vec::new());
        assert!(view.is_busy());
        view.mark_committed();
        assert_eq!(view.state(), ViewState::Committed);
    }

    #[test]
    fn parallel_classification() {
        let view = TransactionView::new(TxId::new(100), TxKind::Client, vec![TxId::new(40)]);

        // Later in the same range.
        assert!(view.is_parallel(TxId::new(101)));
        // In the immediately following range.
        assert!(view.is_parallel(TxId::new(RANGE_SIZE + 1)));
        // On the earlier-running snapshot.
        assert!(view.is_parallel(TxId::new(40)));
        // Earlier in the same range and not snapshotted.
        assert!(!view.is_parallel(TxId::new(39)));
        // Two ranges away.
        assert!(!view.is_parallel(TxId::new(2 * RANGE_SIZE + 1)));
    }

    #[test]
    fn fast_paths() {
        let ledger = create_ledger();
        let view = ledger.register(TxKind::Client).unwrap();

        let v = view
            .record_visibility(
                &ledger,
                TxId::NEVER_COMMITTED,
                TxId::NEVER_COMMITTED,
                ShowMode::Snapshot,
            )
            .unwrap();
        assert!(!v.visible);
        assert!(v.permanently_invisible);

        let v = view
            .record_visibility(
                &ledger,
                TxId::ALWAYS_COMMITTED,
                TxId::ALWAYS_COMMITTED,
                ShowMode::Snapshot,
            )
            .unwrap();
        assert!(!v.visible);
        assert!(v.permanently_invisible);

        let v = view
            .record_visibility(
                &ledger,
                TxId::ALWAYS_COMMITTED,
                TxId::NEVER_COMMITTED,
                ShowMode::Snapshot,
            )
            .unwrap();
        assert!(v.visible);
    }

    #[test]
    fn own_writes_are_visible() {
        let ledger = create_ledger();
        let view = ledger.register(TxKind::Client).unwrap();

        let v = view
            .record_visibility(&ledger, view.id(), TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap();
        assert!(v.visible);
    }

    #[test]
    fn snapshot_hides_earlier_running_commit() {
        // T1 registers; T2 registers and commits. T2 is on T1's
        // earlier-running list, so T1 must still read it as rolled back.
        let ledger = create_ledger();
        let t1 = ledger.register(TxKind::Client).unwrap();
        let mut t2 = ledger.register(TxKind::Client).unwrap();
        let t2_id = t2.id();
        finish(&ledger, &mut t2, true);

        // t2 is not on t1's earlier list (it started later), but it is
        // parallel by the same-range-later rule.
        let (status, _) = t1.trans_status(&ledger, t2_id, ShowMode::Snapshot).unwrap();
        assert_eq!(status, TxStatus::LocalRolledBack);

        let v = t1
            .record_visibility(&ledger, t2_id, TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap();
        assert!(!v.visible);

        // After-commit mode sees it.
        let v = t1
            .record_visibility(&ledger, t2_id, TxId::NEVER_COMMITTED, ShowMode::AfterCommit)
            .unwrap();
        assert!(v.visible);
    }

    #[test]
    fn snapshot_hides_commit_from_earlier_list() {
        let ledger = create_ledger();
        let mut t1 = ledger.register(TxKind::Client).unwrap();
        let t1_id = t1.id();
        let t2 = ledger.register(TxKind::Client).unwrap();
        assert_eq!(t2.earlier_running(), &[t1_id]);

        finish(&ledger, &mut t1, true);

        // t1 committed, but it is on t2's earlier-running list.
        let v = t2
            .record_visibility(&ledger, t1_id, TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap();
        assert!(!v.visible);
    }

    #[test]
    fn repeated_checks_are_stable() {
        let ledger = create_ledger();
        let t1 = ledger.register(TxKind::Client).unwrap();
        let mut t2 = ledger.register(TxKind::Client).unwrap();
        let t2_id = t2.id();

        let before = t1
            .record_visibility(&ledger, t2_id, TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap()
            .visible;
        finish(&ledger, &mut t2, true);
        let after = t1
            .record_visibility(&ledger, t2_id, TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap()
            .visible;

        assert_eq!(before, after);
    }

    #[test]
    fn committed_inserter_visible_to_later_transaction() {
        let ledger = create_ledger();
        let mut writer = ledger.register(TxKind::Client).unwrap();
        let writer_id = writer.id();
        finish(&ledger, &mut writer, true);

        let reader = ledger.register(TxKind::Client).unwrap();
        let v = reader
            .record_visibility(&ledger, writer_id, TxId::NEVER_COMMITTED, ShowMode::Snapshot)
            .unwrap();
        assert!(v.visible);
        // The writer's commit is permanent, so the metadata memoizes it.
        assert_eq!(v.inserter, TxId::ALWAYS_COMMITTED);
    }

    #[test]
    fn settled_pair_collapses_to_permanently_invisible() {
        let ledger = create_ledger();
        let mut ins = ledger.register(TxKind::Client).unwrap();
        let mut exp = ledger.register(TxKind::Client).unwrap();
        let (ins_id, exp_id) = (ins.id(), exp.id());
        finish(&ledger, &mut ins, true);
        finish(&ledger, &mut exp, true);

        let observer = ledger.register(TxKind::Client).unwrap();
        let v = observer
            .record_visibility(&ledger, ins_id, exp_id, ShowMode::Snapshot)
            .unwrap();
        assert!(!v.visible);
        assert!(v.permanently_invisible);
        assert_eq!(v.inserter, TxId::ALWAYS_COMMITTED);
        assert_eq!(v.expirer, TxId::ALWAYS_COMMITTED);
    }

    #[test]
    fn rolled_back_expirer_leaves_record_visible() {
        let ledger = create_ledger();
        let mut ins = ledger.register(TxKind::Client).unwrap();
        let ins_id = ins.id();
        finish(&ledger, &mut ins, true);
        let mut exp = ledger.register(TxKind::Client).unwrap();
        let exp_id = exp.id();
        finish(&ledger, &mut exp, false);

        let observer = ledger.register(TxKind::Client).unwrap();
        let v = observer
            .record_visibility(&ledger, ins_id, exp_id, ShowMode::Snapshot)
            .unwrap();
        assert!(v.visible);
        assert_eq!(v.expirer, TxId::NEVER_COMMITTED);
    }
}
