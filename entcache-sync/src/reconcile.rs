//! Reference Reconciler.
//!
//! Brings a collection in line with an incoming member set without
//! rebuilding it: members already present keep their identity, new ones are
//! inserted, and members the server no longer reports are removed unless a
//! pending local change vetoes the removal.

use entcache_model::{Entity, EntityRef, ReferenceCollection};
use entcache_types::LifecycleStatus;
use std::collections::HashSet;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::debug;

/// Counters collected while merging incoming collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Incoming members that were already present.
    pub matched: usize,
    /// Members inserted.
    pub added: usize,
    /// Unmatched members removed.
    pub removed: usize,
    /// Unmatched members kept because of a pending local change.
    pub kept: usize,
    /// Collections bulk-replaced instead of reconciled.
    pub replaced: usize,
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.matched += other.matched;
        self.added += other.added;
        self.removed += other.removed;
        self.kept += other.kept;
        self.replaced += other.replaced;
    }
}

/// One reconciliation pass over a collection.
///
/// Feed incoming members through [`observe`](Self::observe) as they are
/// decoded, then call [`finish`](Self::finish) once the array ends.
pub struct Reconciler<'a> {
    collection: &'a ReferenceCollection,
    existing: Vec<EntityRef>,
    matched: HashSet<*const Entity>,
    stats: ReconcileStats,
}

impl<'a> Reconciler<'a> {
    pub fn new(collection: &'a ReferenceCollection) -> Self {
        Self {
            collection,
            existing: collection.items(),
            matched: HashSet::new(),
            stats: ReconcileStats::default(),
        }
    }

    /// Marks an incoming member as matched, inserting it if it is new to
    /// the collection.
    pub fn observe(&mut self, entity: EntityRef) {
        if !self.matched.insert(Arc::as_ptr(&entity)) {
            return;
        }
        if self.existing.iter().any(|e| Arc::ptr_eq(e, &entity)) {
            self.stats.matched += 1;
        } else if self.collection.insert_incoming(entity) {
            self.stats.added += 1;
        }
    }

    /// Removes every unmatched member that is not vetoed.
    pub fn finish(mut self) -> ReconcileStats {
        for member in &self.existing {
            if self.matched.contains(&Arc::as_ptr(member)) {
                continue;
            }
            if self.vetoes(member) {
                debug!(
                    "Keeping {} in {}: pending local change",
                    member.type_name(),
                    self.collection.name()
                );
                self.stats.kept += 1;
            } else if self.collection.remove_incoming(member) {
                self.stats.removed += 1;
            }
        }
        debug!(
            "Reconciled {}: {} matched, {} added, {} removed, {} kept",
            self.collection.name(),
            self.stats.matched,
            self.stats.added,
            self.stats.removed,
            self.stats.kept
        );
        self.stats
    }

    /// Keeps an unmatched member that still belongs somewhere on this side:
    /// a `New` member the server has never seen, or one whose inverse
    /// reference holds a pending local edit, meaning it was moved to another
    /// owner's collection that has not been synchronised yet. The removal
    /// waits until that change round-trips.
    fn vetoes(&self, member: &EntityRef) -> bool {
        member.status() == LifecycleStatus::New
            || self
                .collection
                .inverse()
                .is_some_and(|inverse| member.is_dirty(inverse))
    }
}

/// Reconciles `collection` against a complete incoming member set.
pub fn reconcile(
    collection: &ReferenceCollection,
    incoming: impl IntoIterator<Item = EntityRef>,
) -> ReconcileStats {
    let mut reconciler = Reconciler::new(collection);
    for entity in incoming {
        reconciler.observe(entity);
    }
    reconciler.finish()
}
