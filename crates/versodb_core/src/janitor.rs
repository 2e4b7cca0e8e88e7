//! Background maintenance: reclaiming dead records and recycling id ranges.
//!
//! The janitor runs on the caller's schedule, not its own thread. Each
//! entry point opens a system transaction where it needs one, asks the
//! visibility engine which records are permanently dead, and reclaims
//! them through the allocator and chase registry.

use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use crate::types::{SectionId, TableId};
use crate::view::{ShowMode, TransactionView, TxKind};
use tracing::{debug, info};

/// Maintenance entry points over one store.
#[derive(Debug)]
pub struct Janitor;

impl Janitor {
    /// Sweeps one section: memoizes permanent visibility outcomes into
    /// record metadata and destroys permanently-invisible records.
    ///
    /// Returns the number of records reclaimed.
    pub fn sweep_section(store: &Store, table: TableId, section: SectionId) -> CoreResult<usize> {
        if store.allocator().free_summary(table, section).is_none() {
            return Err(CoreError::internal(format!(
                "sweep of {section} which {table} does not own"
            )));
        }

        let mut view = store.begin(TxKind::System)?;
        let result = Self::sweep_with(store, &view, section);
        store.finish(&mut view, result.is_ok())?;
        result
    }

    fn sweep_with(
        store: &Store,
        view: &TransactionView,
        section: SectionId,
    ) -> CoreResult<usize> {
        let mut reclaimed = 0;
        for (id, inserter, updater) in store.allocator().record_heads(section)? {
            let vis = view.record_visibility(store.ledger(), inserter, updater, ShowMode::Snapshot)?;
            if vis.permanently_invisible {
                store.allocator().destroy_record(id)?;
                store.chase().try_delete_chase_data(id);
                reclaimed += 1;
            } else if (vis.inserter, vis.expirer) != (inserter, updater) {
                store.allocator().set_record_ids(id, vis.inserter, vis.expirer)?;
            }
        }
        if reclaimed > 0 {
            debug!(%section, reclaimed, "swept section");
        }
        Ok(reclaimed)
    }

    /// Retires a transaction id range: rewrites every id of the range in
    /// record metadata to its terminal sentinel, destroys the records left
    /// permanently dead, then clears the range's ledger pages for reuse.
    ///
    /// Returns the number of records destroyed.
    pub fn retire_range(store: &Store, range: u8) -> CoreResult<usize> {
        let mut destroyed = 0;
        for (table, sections) in store.allocator().tables() {
            for section in sections {
                let dead = store
                    .allocator()
                    .clear_obsolete_transactions(store.ledger(), table, range, section)?;
                for id in dead {
                    store.allocator().destroy_record(id)?;
                    store.chase().try_delete_chase_data(id);
                    destroyed += 1;
                }
            }
        }
        store.ledger().clear_range(range)?;
        info!(range, destroyed, "retired transaction id range");
        Ok(destroyed)
    }

    /// Switches id issuance to the next range once the current one has
    /// entered its switching headroom.
    ///
    /// Returns whether a switch happened. A range still referenced by
    /// live or remembered transactions defers the switch to a later call.
    pub fn recycle_ranges(store: &Store) -> CoreResult<bool> {
        if !store.ledger().in_switch_headroom() {
            return Ok(false);
        }
        match store.ledger().switch_to_next_range() {
            Ok(()) => Ok(true),
            Err(CoreError::Internal { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
