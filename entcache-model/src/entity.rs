use crate::collection::ReferenceCollection;
use crate::ledger::{ChangeLedger, Original};
use crate::{ModelError, ModelResult, PropertyDescriptor, PropertyKind, TypeDescriptor};
use entcache_types::{EntityKey, LifecycleStatus};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Shared handle to a cached entity. Identity is pointer identity.
pub type EntityRef = Arc<Entity>;

/// The current value of one property slot.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Attribute(Value),
    Reference(Option<EntityRef>),
    Collection(Arc<ReferenceCollection>),
}

/// A cached, identity-tracked entity instance.
///
/// Instances are created once per identity and shared through [`EntityRef`].
/// Field state sits behind a short-lived mutex; whole decode passes are
/// serialised separately through [`Entity::lock_decode`].
pub struct Entity {
    decode_lock: ReentrantMutex<()>,
    state: Mutex<EntityState>,
}

struct EntityState {
    /// Current type. Only ever narrows to a subtype, see [`Entity::narrow_to`].
    descriptor: Arc<TypeDescriptor>,
    key: Option<EntityKey>,
    status: LifecycleStatus,
    ledger: ChangeLedger,
    values: Vec<PropertyValue>,
}

/// A point-in-time copy of an instance, taken under one lock acquisition.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub key: Option<EntityKey>,
    pub status: LifecycleStatus,
    pub dirty: BTreeSet<usize>,
    pub values: Vec<PropertyValue>,
}

/// State captured when a decode pass starts, handed back to
/// [`Entity::abort_load`] if the pass fails.
#[derive(Debug)]
pub struct LoadCheckpoint {
    status: LifecycleStatus,
    values: Vec<PropertyValue>,
    members: Vec<(usize, Vec<EntityRef>)>,
}

impl LoadCheckpoint {
    /// True if the pass moved the instance into [`LifecycleStatus::Load`].
    pub fn entered_load(&self) -> bool {
        self.status.is_refreshable()
    }

    /// Status the instance had when the pass started.
    pub fn status(&self) -> LifecycleStatus {
        self.status
    }
}

impl Entity {
    /// Creates a local instance in [`LifecycleStatus::New`] without a key.
    pub fn new(descriptor: Arc<TypeDescriptor>) -> EntityRef {
        Self::build(descriptor, None, LifecycleStatus::New)
    }

    /// Creates a local instance in [`LifecycleStatus::New`] with a
    /// client-generated key.
    pub fn new_with_key(descriptor: Arc<TypeDescriptor>, key: EntityKey) -> EntityRef {
        Self::build(descriptor, Some(key), LifecycleStatus::New)
    }

    /// Creates a blank server-side instance in [`LifecycleStatus::Actual`],
    /// ready to be filled by an incoming payload.
    pub fn blank(descriptor: Arc<TypeDescriptor>, key: EntityKey) -> EntityRef {
        Self::build(descriptor, Some(key), LifecycleStatus::Actual)
    }

    fn build(
        descriptor: Arc<TypeDescriptor>,
        key: Option<EntityKey>,
        status: LifecycleStatus,
    ) -> EntityRef {
        Arc::new_cyclic(|owner: &Weak<Entity>| {
            let values = descriptor
                .properties()
                .iter()
                .enumerate()
                .map(|(index, property)| initial_value(&descriptor, owner, index, property, &key))
                .collect();
            Entity {
                decode_lock: ReentrantMutex::new(()),
                state: Mutex::new(EntityState {
                    descriptor: descriptor.clone(),
                    key,
                    status,
                    ledger: ChangeLedger::new(),
                    values,
                }),
            }
        })
    }

    pub fn descriptor(&self) -> Arc<TypeDescriptor> {
        self.state.lock().descriptor.clone()
    }

    pub fn type_name(&self) -> String {
        self.state.lock().descriptor.name().to_string()
    }

    /// Narrows the instance to `concrete`, a strict subtype of its current
    /// type, appending blank slots for the subtype's own properties and
    /// stamping its discriminator. Returns false if `concrete` is the current
    /// type or not derived from it.
    pub fn narrow_to(self: &Arc<Self>, concrete: &Arc<TypeDescriptor>) -> bool {
        let owner = Arc::downgrade(self);
        let mut state = self.state.lock();
        let current = state.descriptor.name().to_string();
        if concrete.name() == current || !concrete.is_a(&current) {
            return false;
        }
        let key = state.key.clone();
        let start = state.values.len();
        for (index, property) in concrete.properties().iter().enumerate().skip(start) {
            let value = initial_value(concrete, &owner, index, property, &key);
            state.values.push(value);
        }
        if let Some(index) = concrete.discriminator_index() {
            state.values[index] = PropertyValue::Attribute(
                concrete
                    .discriminator_value()
                    .map_or(Value::Null, Value::from),
            );
        }
        state.descriptor = concrete.clone();
        true
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.state.lock().key.clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.lock().status
    }

    /// Reads an attribute value. The identity property yields the key.
    pub fn get(&self, name: &str) -> Option<Value> {
        let index = self.descriptor().index_of(name)?;
        match &self.state.lock().values[index] {
            PropertyValue::Attribute(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn reference(&self, name: &str) -> Option<EntityRef> {
        let index = self.descriptor().index_of(name)?;
        match &self.state.lock().values[index] {
            PropertyValue::Reference(value) => value.clone(),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<Arc<ReferenceCollection>> {
        let index = self.descriptor().index_of(name)?;
        self.collection_at(index)
    }

    pub fn collection_at(&self, index: usize) -> Option<Arc<ReferenceCollection>> {
        match self.state.lock().values.get(index)? {
            PropertyValue::Collection(collection) => Some(collection.clone()),
            _ => None,
        }
    }

    pub fn value_at(&self, index: usize) -> Option<PropertyValue> {
        self.state.lock().values.get(index).cloned()
    }

    // ── Local mutation ───────────────────────────────────────────

    /// Sets an attribute as a local edit.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let descriptor = self.descriptor();
        let (index, property) = self.editable(&descriptor, name)?;
        if !property.is_attribute() {
            return Err(self.kind_mismatch(property, "an attribute"));
        }
        let value = value.into();
        let mut state = self.state.lock();
        if let PropertyValue::Attribute(current) = &state.values[index] {
            if *current == value {
                return Ok(());
            }
            let original = Original::Value(current.clone());
            state.track_edit(index, property, original);
        }
        state.values[index] = PropertyValue::Attribute(value);
        Ok(())
    }

    /// Points a reference at another entity (or clears it) as a local edit.
    pub fn set_reference(&self, name: &str, target: Option<EntityRef>) -> ModelResult<()> {
        let descriptor = self.descriptor();
        let (index, property) = self.editable(&descriptor, name)?;
        if !property.is_reference() {
            return Err(self.kind_mismatch(property, "a reference"));
        }
        let mut state = self.state.lock();
        if let PropertyValue::Reference(current) = &state.values[index] {
            let same = match (current, &target) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if same {
                return Ok(());
            }
            let original = Original::Reference(current.clone());
            state.track_edit(index, property, original);
        }
        state.values[index] = PropertyValue::Reference(target);
        Ok(())
    }

    /// Records a local membership change of one of this entity's collections.
    pub(crate) fn collection_edited(&self, index: usize, before: Vec<EntityRef>) {
        let descriptor = self.descriptor();
        let Some(property) = descriptor.property_at(index) else {
            return;
        };
        self.state
            .lock()
            .track_edit(index, property, Original::Items(before));
    }

    /// Assigns the identity key. Fails if a different key is already set.
    pub fn assign_key(&self, key: EntityKey) -> ModelResult<()> {
        let mut state = self.state.lock();
        let identity = state.descriptor.identity_index();
        if let Some(existing) = &state.key {
            return if *existing == key {
                Ok(())
            } else {
                Err(ModelError::KeyAlreadyAssigned(state.descriptor.name().to_string()))
            };
        }
        state.values[identity] = PropertyValue::Attribute(key.to_json());
        state.key = Some(key);
        Ok(())
    }

    fn editable<'d>(
        &self,
        descriptor: &'d TypeDescriptor,
        name: &str,
    ) -> ModelResult<(usize, &'d PropertyDescriptor)> {
        let (index, property) =
            descriptor
                .property(name)
                .ok_or_else(|| ModelError::UnknownProperty {
                    type_name: descriptor.name().to_string(),
                    property: name.to_string(),
                })?;
        if property.read_only || property.is_header() {
            return Err(ModelError::ReadOnly {
                type_name: descriptor.name().to_string(),
                property: name.to_string(),
            });
        }
        Ok((index, property))
    }

    fn kind_mismatch(&self, property: &PropertyDescriptor, expected: &'static str) -> ModelError {
        ModelError::KindMismatch {
            type_name: self.type_name(),
            property: property.name.clone(),
            expected,
        }
    }

    // ── Change ledger ────────────────────────────────────────────

    /// True if `name` holds an unsent local edit. Every tracked property of a
    /// `New` instance counts as dirty.
    pub fn is_dirty(&self, name: &str) -> bool {
        self.descriptor()
            .index_of(name)
            .is_some_and(|index| self.is_pending_at(index))
    }

    /// True if an incoming value for property `index` must yield to a local edit.
    pub fn is_pending_at(&self, index: usize) -> bool {
        let state = self.state.lock();
        let Some(property) = state.descriptor.property_at(index) else {
            return false;
        };
        if !property.change_sensitive {
            return false;
        }
        state.status == LifecycleStatus::New || state.ledger.is_dirty(index)
    }

    /// True if the ledger holds an explicit entry for property `index`.
    /// Unlike [`is_pending_at`](Self::is_pending_at) this ignores the
    /// implicit dirtiness of `New` instances.
    pub fn is_edited_at(&self, index: usize) -> bool {
        self.state.lock().ledger.is_dirty(index)
    }

    /// Names of properties recorded in the change ledger.
    pub fn dirty_properties(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .ledger
            .dirty_indices()
            .filter_map(|i| state.descriptor.property_at(i))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Marks local edits as persisted: clears the ledger and returns to `Actual`.
    pub fn accept_changes(&self) {
        let mut state = self.state.lock();
        state.ledger.clear();
        state.status = LifecycleStatus::Actual;
    }

    /// Restores every recorded original. A `New` instance stays `New`.
    pub fn reject_changes(&self) {
        let restored = {
            let mut state = self.state.lock();
            let entries = state.ledger.take();
            if state.status != LifecycleStatus::New {
                state.status = LifecycleStatus::Actual;
            }
            state.restore(entries)
        };
        for (collection, items) in restored {
            collection.replace_incoming(items);
        }
    }

    /// Restores one property and drops its ledger entry, letting the next
    /// incoming payload overwrite it.
    pub fn revert(&self, name: &str) -> bool {
        let Some(index) = self.descriptor().index_of(name) else {
            return false;
        };
        let restored = {
            let mut state = self.state.lock();
            let Some(original) = state.ledger.resolve(index) else {
                return false;
            };
            if state.ledger.is_empty() && state.status == LifecycleStatus::Edit {
                state.status = LifecycleStatus::Actual;
            }
            state.restore([(index, original)].into_iter().collect())
        };
        for (collection, items) in restored {
            collection.replace_incoming(items);
        }
        true
    }

    /// `Actual → Suspend`. Returns false for any other status.
    pub fn suspend(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == LifecycleStatus::Actual {
            state.status = LifecycleStatus::Suspend;
            return true;
        }
        false
    }

    /// `Suspend → Actual`. Returns false for any other status.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == LifecycleStatus::Suspend {
            state.status = LifecycleStatus::Actual;
            return true;
        }
        false
    }

    // ── Incoming data ────────────────────────────────────────────

    /// Serialises decode passes into this instance. Reentrant, so a payload
    /// that loops back to an instance already under decode does not block.
    pub fn lock_decode(&self) -> ReentrantMutexGuard<'_, ()> {
        self.decode_lock.lock()
    }

    /// `Actual|Suspend → Load`. Returns true if the transition happened.
    pub fn begin_load(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_refreshable() {
            state.status = LifecycleStatus::Load;
            return true;
        }
        false
    }

    /// Starts a decode pass: `Actual|Suspend → Load`, like
    /// [`begin_load`](Self::begin_load), and captures the values and
    /// membership the pass may overwrite.
    pub fn begin_pass(&self) -> LoadCheckpoint {
        let (status, values) = {
            let mut state = self.state.lock();
            let status = state.status;
            if status.is_refreshable() {
                state.status = LifecycleStatus::Load;
            }
            (status, state.values.clone())
        };
        // Collection locks are taken after the state lock is released.
        let members = values
            .iter()
            .enumerate()
            .filter_map(|(index, value)| match value {
                PropertyValue::Collection(collection) => Some((index, collection.items())),
                _ => None,
            })
            .collect();
        LoadCheckpoint {
            status,
            values,
            members,
        }
    }

    /// Undoes a failed decode pass. Server values and memberships written
    /// during the pass are put back and `Load` returns to the status the pass
    /// started from. Properties edited locally in the meantime keep their edit.
    pub fn abort_load(&self, checkpoint: LoadCheckpoint) {
        let LoadCheckpoint {
            status,
            values,
            members,
        } = checkpoint;
        let (edited, collections) = {
            let mut state = self.state.lock();
            if state.status == LifecycleStatus::Load {
                state.status = status;
            }
            let edited: BTreeSet<usize> = state.ledger.dirty_indices().collect();
            for (index, value) in values.into_iter().enumerate() {
                if edited.contains(&index) || matches!(value, PropertyValue::Collection(_)) {
                    continue;
                }
                if let Some(slot) = state.values.get_mut(index) {
                    *slot = value;
                }
            }
            let collections: Vec<Option<Arc<ReferenceCollection>>> = members
                .iter()
                .map(|(index, _)| match state.values.get(*index) {
                    Some(PropertyValue::Collection(collection)) => Some(collection.clone()),
                    _ => None,
                })
                .collect();
            (edited, collections)
        };
        for ((index, items), collection) in members.into_iter().zip(collections) {
            let Some(collection) = collection else {
                continue;
            };
            if edited.contains(&index) || same_members(&collection.items(), &items) {
                continue;
            }
            collection.replace_incoming(items);
        }
    }

    /// Ends a decode pass: `Load → Actual`, or `Load → Edit` when local edits
    /// landed during the pass. Other statuses are left alone.
    pub fn finish_load(&self) -> LifecycleStatus {
        let mut state = self.state.lock();
        if state.status == LifecycleStatus::Load {
            state.status = if state.ledger.is_empty() {
                LifecycleStatus::Actual
            } else {
                LifecycleStatus::Edit
            };
        }
        state.status
    }

    /// Stores a server value without touching the ledger or status.
    /// Collections are reconciled through [`ReferenceCollection`] instead.
    pub fn apply_incoming(&self, index: usize, value: PropertyValue) {
        let mut state = self.state.lock();
        if let Some(slot) = state.values.get_mut(index) {
            if !matches!(slot, PropertyValue::Collection(_)) {
                *slot = value;
            }
        }
    }

    /// Stores a server attribute value by name.
    pub fn load(&self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let descriptor = self.descriptor();
        let (index, property) =
            descriptor
                .property(name)
                .ok_or_else(|| ModelError::UnknownProperty {
                    type_name: descriptor.name().to_string(),
                    property: name.to_string(),
                })?;
        if !property.is_attribute() {
            return Err(self.kind_mismatch(property, "an attribute"));
        }
        self.apply_incoming(index, PropertyValue::Attribute(value.into()));
        Ok(())
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        let state = self.state.lock();
        EntitySnapshot {
            key: state.key.clone(),
            status: state.status,
            dirty: state.ledger.dirty_indices().collect(),
            values: state.values.clone(),
        }
    }
}

impl EntityState {
    fn track_edit(&mut self, index: usize, property: &PropertyDescriptor, original: Original) {
        if !property.change_sensitive {
            return;
        }
        if self.status != LifecycleStatus::New {
            self.ledger.record(index, original);
        }
        self.status = self.status.after_local_edit();
    }

    /// Writes originals back into value slots. Collection contents are
    /// returned so they can be restored after the state lock is released.
    fn restore(
        &mut self,
        entries: std::collections::BTreeMap<usize, Original>,
    ) -> Vec<(Arc<ReferenceCollection>, Vec<EntityRef>)> {
        let mut collections = Vec::new();
        for (index, original) in entries {
            match original {
                Original::Value(value) => self.values[index] = PropertyValue::Attribute(value),
                Original::Reference(target) => {
                    self.values[index] = PropertyValue::Reference(target);
                }
                Original::Items(items) => {
                    if let PropertyValue::Collection(collection) = &self.values[index] {
                        collections.push((collection.clone(), items));
                    }
                }
            }
        }
        collections
    }
}

fn same_members(a: &[EntityRef], b: &[EntityRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

fn initial_value(
    descriptor: &TypeDescriptor,
    owner: &Weak<Entity>,
    index: usize,
    property: &PropertyDescriptor,
    key: &Option<EntityKey>,
) -> PropertyValue {
    match &property.kind {
        PropertyKind::Attribute if property.identity => {
            PropertyValue::Attribute(key.as_ref().map_or(Value::Null, EntityKey::to_json))
        }
        PropertyKind::Attribute if property.discriminator => PropertyValue::Attribute(
            descriptor
                .discriminator_value()
                .map_or(Value::Null, Value::from),
        ),
        PropertyKind::Attribute => PropertyValue::Attribute(Value::Null),
        PropertyKind::Reference { .. } => PropertyValue::Reference(None),
        PropertyKind::Collection { target, inverse } => {
            PropertyValue::Collection(Arc::new(ReferenceCollection::new(
                owner.clone(),
                index,
                &property.name,
                target,
                inverse.as_deref(),
            )))
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Entity");
        // The state lock is not reentrant; skip fields if it is held.
        if let Some(state) = self.state.try_lock() {
            out.field("type", &state.descriptor.name())
                .field("key", &state.key)
                .field("status", &state.status)
                .field("dirty", &state.ledger.len());
        }
        out.finish()
    }
}
