use crate::{Entity, EntityRef};
use entcache_types::LifecycleStatus;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A membership change observed on a [`ReferenceCollection`].
#[derive(Debug, Clone)]
pub enum CollectionChange {
    Added(EntityRef),
    Removed(EntityRef),
    /// The whole content was replaced.
    Reset,
}

/// Callback registered with [`ReferenceCollection::subscribe`].
pub type CollectionListener = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Handle returned by [`ReferenceCollection::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An identity-tracked one-to-many collection owned by an entity.
///
/// The container lives as long as its owner and is never swapped out, so
/// listeners attached to it survive every refresh. Members compare by
/// pointer identity.
pub struct ReferenceCollection {
    owner: Weak<Entity>,
    property: usize,
    name: String,
    target: String,
    inverse: Option<String>,
    items: Mutex<Vec<EntityRef>>,
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next: u64,
    entries: Vec<(ListenerId, CollectionListener)>,
}

impl ReferenceCollection {
    pub(crate) fn new(
        owner: Weak<Entity>,
        property: usize,
        name: &str,
        target: &str,
        inverse: Option<&str>,
    ) -> Self {
        Self {
            owner,
            property,
            name: name.into(),
            target: target.into(),
            inverse: inverse.map(Into::into),
            items: Mutex::new(Vec::new()),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    pub fn owner(&self) -> Option<EntityRef> {
        self.owner.upgrade()
    }

    /// Status of the owning entity; `None` once the owner is dropped.
    pub fn owner_status(&self) -> Option<LifecycleStatus> {
        self.owner.upgrade().map(|owner| owner.status())
    }

    /// Index of the owning property in the owner's descriptor.
    pub fn property_index(&self) -> usize {
        self.property
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type name.
    pub fn target_type(&self) -> &str {
        &self.target
    }

    /// Back-reference property on the element type, if declared.
    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Snapshot of the current members, in order.
    pub fn items(&self) -> Vec<EntityRef> {
        self.items.lock().clone()
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.items.lock().iter().any(|e| Arc::ptr_eq(e, entity))
    }

    pub fn subscribe(&self, listener: impl Fn(&CollectionChange) + Send + Sync + 'static) -> ListenerId {
        let mut listeners = self.listeners.lock();
        listeners.next += 1;
        let id = ListenerId(listeners.next);
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    // ── Local edits ──────────────────────────────────────────────

    /// Adds a member as a local edit. Returns false if already present.
    pub fn add(&self, entity: EntityRef) -> bool {
        let Some(before) = self.mutate(|items| {
            if items.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                return false;
            }
            items.push(entity.clone());
            true
        }) else {
            return false;
        };
        self.record_edit(before);
        self.notify(&CollectionChange::Added(entity));
        true
    }

    /// Removes a member as a local edit. Returns false if it was absent.
    pub fn remove(&self, entity: &EntityRef) -> bool {
        let Some(before) = self.mutate(|items| {
            let len = items.len();
            items.retain(|e| !Arc::ptr_eq(e, entity));
            items.len() != len
        }) else {
            return false;
        };
        self.record_edit(before);
        self.notify(&CollectionChange::Removed(entity.clone()));
        true
    }

    // ── Incoming data (no change tracking) ───────────────────────

    /// Adds a member reported by the server. Returns false if already present.
    pub fn insert_incoming(&self, entity: EntityRef) -> bool {
        {
            let mut items = self.items.lock();
            if items.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                return false;
            }
            items.push(entity.clone());
        }
        self.notify(&CollectionChange::Added(entity));
        true
    }

    /// Drops a member the server no longer reports.
    pub fn remove_incoming(&self, entity: &EntityRef) -> bool {
        let removed = {
            let mut items = self.items.lock();
            let len = items.len();
            items.retain(|e| !Arc::ptr_eq(e, entity));
            items.len() != len
        };
        if removed {
            self.notify(&CollectionChange::Removed(entity.clone()));
        }
        removed
    }

    /// Replaces the whole content in place. The container keeps its identity.
    pub fn replace_incoming(&self, entities: Vec<EntityRef>) {
        *self.items.lock() = entities;
        self.notify(&CollectionChange::Reset);
    }

    /// Applies `f` under the items lock, returning the prior content when
    /// `f` reports a change.
    fn mutate(&self, f: impl FnOnce(&mut Vec<EntityRef>) -> bool) -> Option<Vec<EntityRef>> {
        let mut items = self.items.lock();
        let before = items.clone();
        f(&mut items).then_some(before)
    }

    fn record_edit(&self, before: Vec<EntityRef>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.collection_edited(self.property, before);
        }
    }

    fn notify(&self, change: &CollectionChange) {
        // Listeners may touch the collection, so call them unlocked.
        let listeners: Vec<CollectionListener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl fmt::Debug for ReferenceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCollection")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("len", &self.items.try_lock().map(|items| items.len()))
            .finish()
    }
}
