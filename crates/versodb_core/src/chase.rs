//! Version-chase registry: update-chain tracking across record versions.
//!
//! When a committed update relocates a record, the old and new physical
//! slots are linked here so a reader that lost an expire race can chase
//! forward to the current version. Links form an arena keyed by record id
//! with explicit neighbor ids, never pointers.

use crate::types::RecordId;
use crate::view::TransactionView;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Default, Clone)]
struct Link {
    last: Option<RecordId>,
    next: Option<RecordId>,
    refs: u32,
}

impl Link {
    fn is_unused(&self) -> bool {
        self.last.is_none() && self.next.is_none() && self.refs == 0
    }
}

/// Registry of record version chains.
#[derive(Debug, Default)]
pub struct ChaseRegistry {
    links: Mutex<HashMap<RecordId, Link>>,
}

impl ChaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Links `old` to its successor version `new`.
    ///
    /// If `old` already had a forward chain that nothing references any
    /// more, that dangling suffix is pruned before the new link is made.
    pub fn register_update(&self, old: RecordId, new: RecordId) {
        let mut links = self.links.lock();

        if let Some(stale_next) = links.get(&old).and_then(|l| l.next) {
            Self::prune_dangling_suffix(&mut links, old, stale_next);
        }

        links.entry(old).or_default().next = Some(new);
        links.entry(new).or_default().last = Some(old);
        trace!(%old, %new, "registered version chase link");
    }

    /// Returns the recorded successor of `id`, if any.
    ///
    /// With `lock`, the successor's refcount is raised and the id is
    /// pushed on the view's held-chase list, keeping the successor's
    /// chain data alive until [`ChaseRegistry::release_held`].
    pub fn chase_next_version(
        &self,
        view: &mut TransactionView,
        id: RecordId,
        lock: bool,
    ) -> Option<RecordId> {
        let mut links = self.links.lock();
        let next = links.get(&id).and_then(|l| l.next)?;
        if lock {
            links.entry(next).or_default().refs += 1;
            view.add_held_chase(next);
        }
        Some(next)
    }

    /// Drops every chase reference the view holds.
    pub fn release_held(&self, view: &mut TransactionView) {
        let held = view.take_held_chases();
        if held.is_empty() {
            return;
        }
        let mut links = self.links.lock();
        for id in held {
            if let Some(link) = links.get_mut(&id) {
                link.refs = link.refs.saturating_sub(1);
                if link.is_unused() {
                    links.remove(&id);
                }
            }
        }
    }

    /// Tries to drop the chain data of `id`.
    ///
    /// Absent data succeeds as a no-op. A referenced link fails; that is
    /// ordinary contention, not an error. Otherwise the link is unlinked
    /// from its neighbors, and any neighbor left with no last, no next and
    /// no references is deleted too, iteratively.
    pub fn try_delete_chase_data(&self, id: RecordId) -> bool {
        let mut links = self.links.lock();
        let Some(link) = links.get(&id) else {
            return true;
        };
        if link.refs > 0 {
            return false;
        }

        let link = links.remove(&id).unwrap_or_default();
        let mut worklist = Vec::new();
        if let Some(last) = link.last {
            if let Some(prev) = links.get_mut(&last) {
                prev.next = None;
                worklist.push(last);
            }
        }
        if let Some(next) = link.next {
            if let Some(succ) = links.get_mut(&next) {
                succ.last = None;
                worklist.push(next);
            }
        }

        while let Some(candidate) = worklist.pop() {
            let remove = links.get(&candidate).is_some_and(Link::is_unused);
            if remove {
                links.remove(&candidate);
            }
        }
        true
    }

    /// Number of live links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// Whether the registry holds no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }

    /// Cuts a forward chain off at `from` and deletes the suffix starting
    /// at `start`, as long as no suffix link is referenced.
    fn prune_dangling_suffix(
        links: &mut HashMap<RecordId, Link>,
        from: RecordId,
        start: RecordId,
    ) {
        // Walk the suffix first; a single referenced link keeps it all.
        let mut cursor = Some(start);
        let mut suffix = Vec::new();
        while let Some(id) = cursor {
            match links.get(&id) {
                Some(link) if link.refs == 0 => {
                    suffix.push(id);
                    cursor = link.next;
                }
                Some(_) => return,
                None => break,
            }
        }

        if let Some(head) = links.get_mut(&from) {
            head.next = None;
        }
        for id in suffix {
            links.remove(&id);
        }
        trace!(%from, "pruned dangling chase suffix");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectionId;
    use crate::view::TxKind;

    fn rec(section: u32, block: u16) -> RecordId {
        RecordId::new(SectionId::new(section), block).unwrap()
    }

    fn view() -> TransactionView {
        TransactionView::new(crate::types::TxId::new(1), TxKind::Client, Vec::new())
    }

    #[test]
    fn chase_follows_registered_update() {
        let chase = ChaseRegistry::new();
        let (old, new) = (rec(0, 64), rec(0, 65));
        chase.register_update(old, new);

        let mut v = view();
        assert_eq!(chase.chase_next_version(&mut v, old, false), Some(new));
        assert_eq!(chase.chase_next_version(&mut v, new, false), None);
    }

    #[test]
    fn delete_without_data_is_noop() {
        let chase = ChaseRegistry::new();
        assert!(chase.try_delete_chase_data(rec(3, 100)));
        assert!(chase.try_delete_chase_data(rec(3, 100)));
        assert!(chase.is_empty());
    }

    #[test]
    fn locked_chase_blocks_deletion_until_release() {
        let chase = ChaseRegistry::new();
        let (old, new) = (rec(0, 64), rec(0, 65));
        chase.register_update(old, new);

        let mut v = view();
        assert_eq!(chase.chase_next_version(&mut v, old, true), Some(new));
        assert!(!chase.try_delete_chase_data(new));

        chase.release_held(&mut v);
        assert!(chase.try_delete_chase_data(new));
    }

    #[test]
    fn delete_unlinks_and_collects_unused_neighbors() {
        let chase = ChaseRegistry::new();
        let (a, b, c) = (rec(0, 64), rec(0, 65), rec(0, 66));
        chase.register_update(a, b);
        chase.register_update(b, c);

        assert!(chase.try_delete_chase_data(b));
        // a lost its next and c its last; neither has any other use.
        assert!(chase.is_empty());
    }

    #[test]
    fn reregister_prunes_dangling_suffix() {
        let chase = ChaseRegistry::new();
        let (a, b, c, d) = (rec(0, 64), rec(0, 65), rec(0, 66), rec(0, 67));
        chase.register_update(a, b);
        chase.register_update(b, c);

        // A new successor for a abandons the b -> c suffix.
        chase.register_update(a, d);

        let mut v = view();
        assert_eq!(chase.chase_next_version(&mut v, a, false), Some(d));
        assert_eq!(chase.chase_next_version(&mut v, b, false), None);
        assert_eq!(chase.chase_next_version(&mut v, c, false), None);
    }

    #[test]
    fn referenced_suffix_survives_reregistration() {
        let chase = ChaseRegistry::new();
        let (a, b, c) = (rec(0, 64), rec(0, 65), rec(0, 66));
        chase.register_update(a, b);

        let mut v = view();
        chase.chase_next_version(&mut v, a, true);

        chase.register_update(a, c);
        // b is still referenced, so its link survives the cut.
        assert!(!chase.try_delete_chase_data(b));
        chase.release_held(&mut v);
    }
}
