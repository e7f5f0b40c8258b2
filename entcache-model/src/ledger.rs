use crate::EntityRef;
use std::collections::BTreeMap;

/// The value a property held before its first unsent local edit.
#[derive(Debug, Clone)]
pub enum Original {
    Value(serde_json::Value),
    Reference(Option<EntityRef>),
    Items(Vec<EntityRef>),
}

/// Per-instance record of change-tracked properties with unsent local edits.
///
/// Keyed by property index. Only the first edit of a property is recorded,
/// so the stored original is the last server-known value.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    entries: BTreeMap<usize, Original>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an edit. Returns true if the property was clean before.
    pub fn record(&mut self, index: usize, original: Original) -> bool {
        if self.entries.contains_key(&index) {
            return false;
        }
        self.entries.insert(index, original);
        true
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn original(&self, index: usize) -> Option<&Original> {
        self.entries.get(&index)
    }

    /// Drops one entry, returning the recorded original.
    pub fn resolve(&mut self, index: usize) -> Option<Original> {
        self.entries.remove(&index)
    }

    pub fn dirty_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Empties the ledger, handing back every original.
    pub fn take(&mut self) -> BTreeMap<usize, Original> {
        std::mem::take(&mut self.entries)
    }
}
