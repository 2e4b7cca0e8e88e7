//! In-memory registry of live and remembered transactions.
//!
//! An entry stays in the registry while it is running, while its view
//! object is alive, or while another live or remembered transaction still
//! holds a reference to it (it appears on an earlier-running snapshot).
//! Every id present in the registry counts as *referred* for the ledger's
//! permanence tests.

use crate::error::{CoreError, CoreResult};
use crate::types::{TxId, RANGE_COUNT};
use std::collections::HashMap;

/// Registry entry for one transaction id.
#[derive(Debug)]
struct Entry {
    /// Still running; may yet commit.
    committable: bool,
    /// Has a live view object.
    active: bool,
    /// Live or remembered transactions depending on this entry.
    refs: u32,
    /// Ids this entry itself holds references to; released when the entry
    /// is torn down or cascaded away.
    holds: Vec<TxId>,
}

/// Arena of registry entries keyed by transaction id, plus the per-range
/// lowest-referred-id summaries derived from it.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: HashMap<TxId, Entry>,
    lowest_referred: [Option<TxId>; RANGE_COUNT as usize],
}

impl Registry {
    /// Inserts a freshly registered transaction.
    ///
    /// `holds` is the new transaction's earlier-running snapshot; each id
    /// on it must already have had its refcount incremented via
    /// [`Registry::add_ref`]. The new entry starts with one self-reference.
    pub fn insert_new(&mut self, id: TxId, holds: Vec<TxId>) {
        self.entries.insert(
            id,
            Entry {
                committable: true,
                active: true,
                refs: 1,
                holds,
            },
        );
        let range = id.range() as usize;
        if self.lowest_referred[range].is_none_or(|low| id < low) {
            self.lowest_referred[range] = Some(id);
        }
    }

    /// Returns all currently-committable ids, sorted ascending.
    pub fn committable_ids(&self) -> Vec<TxId> {
        let mut ids: Vec<TxId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.committable)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Increments an entry's reference count.
    pub fn add_ref(&mut self, id: TxId) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::internal(format!("add_ref on unknown {id}")))?;
        entry.refs += 1;
        Ok(())
    }

    /// Marks a transaction as finished (no longer committable).
    ///
    /// # Errors
    ///
    /// `Internal` if the id is unknown or already finished.
    pub fn set_finished(&mut self, id: TxId) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::internal(format!("finish of unknown {id}")))?;
        if !entry.committable {
            return Err(CoreError::internal(format!("double finish of {id}")));
        }
        entry.committable = false;
        Ok(())
    }

    /// Tears down a transaction's registry presence: releases everything
    /// it holds, marks it inactive, and drops its self-reference.
    ///
    /// Entries whose refcount reaches zero are removed, iteratively
    /// releasing whatever they still held.
    pub fn unregister(&mut self, id: TxId) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::internal(format!("unregister of unknown {id}")))?;
        // A view dropped without an explicit finish counts as rolled back.
        entry.committable = false;
        entry.active = false;
        let held = std::mem::take(&mut entry.holds);

        for other in held {
            self.release(other)?;
        }
        self.release(id)?;
        self.recompute_lowest_referred();
        Ok(())
    }

    /// Decrements refcounts along a worklist, removing entries that reach
    /// zero while neither running nor active.
    fn release(&mut self, id: TxId) -> CoreResult<()> {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            let entry = self
                .entries
                .get_mut(&id)
                .ok_or_else(|| CoreError::internal(format!("release of unknown {id}")))?;
            if entry.refs == 0 {
                return Err(CoreError::internal(format!("refcount underflow on {id}")));
            }
            entry.refs -= 1;
            if entry.refs == 0 && !entry.committable && !entry.active {
                let entry = self
                    .entries
                    .remove(&id)
                    .ok_or_else(|| CoreError::internal("entry vanished under release"))?;
                worklist.extend(entry.holds);
            }
        }
        Ok(())
    }

    /// Whether the id is still running (could yet commit).
    pub fn is_running(&self, id: TxId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.committable)
    }

    /// Whether the id still has a live transaction object behind it.
    pub fn is_live(&self, id: TxId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.committable || e.active)
    }

    /// Lowest referred id in a range, if any.
    pub fn lowest_referred(&self, range: u8) -> Option<TxId> {
        self.lowest_referred[range as usize]
    }

    /// Whether any referred id falls in the closed interval `[a, b]`.
    pub fn any_referred_in(&self, a: TxId, b: TxId) -> bool {
        self.entries.keys().any(|&id| a <= id && id <= b)
    }

    /// Whether any referred id falls in the given range.
    pub fn any_referred_in_range(&self, range: u8) -> bool {
        self.entries.keys().any(|id| id.range() == range)
    }

    /// Number of entries (live plus remembered).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Full rescan of the per-range lowest-referred summaries.
    fn recompute_lowest_referred(&mut self) {
        self.lowest_referred = [None; RANGE_COUNT as usize];
        for &id in self.entries.keys() {
            let range = id.range() as usize;
            if self.lowest_referred[range].is_none_or(|low| id < low) {
                self.lowest_referred[range] = Some(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_query() {
        let mut reg = Registry::default();
        reg.insert_new(TxId::new(5), Vec::new());

        assert!(reg.is_running(TxId::new(5)));
        assert!(reg.is_live(TxId::new(5)));
        assert_eq!(reg.lowest_referred(0), Some(TxId::new(5)));
        assert_eq!(reg.committable_ids(), vec![TxId::new(5)]);
    }

    #[test]
    fn unregister_removes_unreferenced_entry() {
        let mut reg = Registry::default();
        reg.insert_new(TxId::new(5), Vec::new());
        reg.set_finished(TxId::new(5)).unwrap();
        reg.unregister(TxId::new(5)).unwrap();

        assert_eq!(reg.len(), 0);
        assert_eq!(reg.lowest_referred(0), None);
    }

    #[test]
    fn referenced_entry_is_remembered() {
        let mut reg = Registry::default();
        let t1 = TxId::new(5);
        let t2 = TxId::new(6);

        reg.insert_new(t1, Vec::new());
        reg.add_ref(t1).unwrap();
        reg.insert_new(t2, vec![t1]);

        // t1 finishes and unregisters, but t2 still holds it.
        reg.set_finished(t1).unwrap();
        reg.unregister(t1).unwrap();
        assert!(!reg.is_live(t1));
        assert!(reg.any_referred_in(t1, t1));
        assert_eq!(reg.lowest_referred(0), Some(t1));

        // Once t2 goes away, t1 cascades out.
        reg.set_finished(t2).unwrap();
        reg.unregister(t2).unwrap();
        assert_eq!(reg.len(), 0);
        assert_eq!(reg.lowest_referred(0), None);
    }

    #[test]
    fn cascade_is_transitive() {
        let mut reg = Registry::default();
        let (t1, t2, t3) = (TxId::new(1), TxId::new(2), TxId::new(3));

        reg.insert_new(t1, Vec::new());
        reg.add_ref(t1).unwrap();
        reg.insert_new(t2, vec![t1]);
        reg.add_ref(t2).unwrap();
        reg.insert_new(t3, vec![t2]);

        reg.set_finished(t1).unwrap();
        reg.unregister(t1).unwrap();
        reg.set_finished(t2).unwrap();
        reg.unregister(t2).unwrap();
        // t1 is gone (released when t2 unregistered), t2 survives via t3.
        assert!(!reg.any_referred_in(t1, t1));
        assert!(reg.any_referred_in(t2, t2));

        reg.set_finished(t3).unwrap();
        reg.unregister(t3).unwrap();
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn double_finish_is_internal_error() {
        let mut reg = Registry::default();
        reg.insert_new(TxId::new(5), Vec::new());
        reg.set_finished(TxId::new(5)).unwrap();

        let result = reg.set_finished(TxId::new(5));
        assert!(matches!(result, Err(CoreError::Internal { .. })));
    }

    #[test]
    fn committable_ids_sorted_and_filtered() {
        let mut reg = Registry::default();
        reg.insert_new(TxId::new(9), Vec::new());
        reg.insert_new(TxId::new(3), Vec::new());
        reg.insert_new(TxId::new(7), Vec::new());
        reg.set_finished(TxId::new(7)).unwrap();

        assert_eq!(reg.committable_ids(), vec![TxId::new(3), TxId::new(9)]);
    }

    #[test]
    fn interval_and_range_queries() {
        let mut reg = Registry::default();
        reg.insert_new(TxId::new(100), Vec::new());

        assert!(reg.any_referred_in(TxId::new(50), TxId::new(150)));
        assert!(!reg.any_referred_in(TxId::new(101), TxId::new(150)));
        assert!(reg.any_referred_in_range(0));
        assert!(!reg.any_referred_in_range(1));
    }
}
