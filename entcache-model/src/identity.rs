use crate::EntityRef;
use entcache_types::EntityKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a claimed instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOrigin {
    /// Already materialised in the identity map.
    Cached,
    /// Created by this caller and staged as an in-flight download.
    Created,
    /// Staged by a concurrent caller; this caller joined it.
    Joined,
}

/// Result of [`IdentityMap::claim`].
#[derive(Debug, Clone)]
pub struct Claim {
    pub entity: EntityRef,
    pub origin: ClaimOrigin,
}

impl Claim {
    /// True if the instance sits in staging and must be promoted once merged.
    pub fn is_staged(&self) -> bool {
        self.origin != ClaimOrigin::Cached
    }
}

/// The per-hierarchy store of materialised instances plus the staging area
/// for instances that are mid-download.
///
/// Implementations must make `claim` atomic per key: exactly one caller
/// creates the blank instance, every other caller receives that same one.
/// No blocking I/O may happen under the lock.
pub trait IdentityMap: Send + Sync {
    /// Looks up a materialised instance.
    fn try_get(&self, key: &EntityKey) -> Option<EntityRef>;

    /// Returns the materialised or staged instance for `key`, staging a new
    /// one from `factory` only if nobody else has.
    fn claim(&self, key: &EntityKey, factory: &dyn Fn() -> EntityRef) -> Claim;

    /// Removes `key` from staging.
    fn release(&self, key: &EntityKey) -> Option<EntityRef>;

    /// Adds a keyed instance. If another instance already holds the key it
    /// stays, and that winner is returned.
    fn add(&self, entity: EntityRef) -> EntityRef;

    /// Removes an instance. Only succeeds for the exact mapped instance.
    fn remove(&self, entity: &EntityRef) -> bool;

    /// Moves a staged instance into the map.
    fn promote(&self, key: &EntityKey) -> Option<EntityRef> {
        let staged = self.release(key)?;
        Some(self.add(staged))
    }

    /// Number of materialised instances.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of staged (in-flight) instances.
    fn staged_len(&self) -> usize;

    /// Snapshot of materialised instances.
    fn entities(&self) -> Vec<EntityRef>;
}

/// In-memory [`IdentityMap`] with one lock over both the map and staging,
/// which makes `claim` and `promote` atomic.
#[derive(Default)]
pub struct MemoryIdentityMap {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    items: HashMap<EntityKey, EntityRef>,
    downloads: HashMap<EntityKey, EntityRef>,
}

impl MemoryIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn IdentityMap> {
        Arc::new(Self::new())
    }
}

impl IdentityMap for MemoryIdentityMap {
    fn try_get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.inner.lock().items.get(key).cloned()
    }

    fn claim(&self, key: &EntityKey, factory: &dyn Fn() -> EntityRef) -> Claim {
        let mut tables = self.inner.lock();
        if let Some(entity) = tables.items.get(key) {
            return Claim {
                entity: entity.clone(),
                origin: ClaimOrigin::Cached,
            };
        }
        if let Some(entity) = tables.downloads.get(key) {
            debug!("Joined in-flight download of {}", key);
            return Claim {
                entity: entity.clone(),
                origin: ClaimOrigin::Joined,
            };
        }
        let entity = factory();
        tables.downloads.insert(key.clone(), entity.clone());
        debug!("Staged new download of {}", key);
        Claim {
            entity,
            origin: ClaimOrigin::Created,
        }
    }

    fn release(&self, key: &EntityKey) -> Option<EntityRef> {
        self.inner.lock().downloads.remove(key)
    }

    fn add(&self, entity: EntityRef) -> EntityRef {
        let Some(key) = entity.key() else {
            warn!("Refusing to map {} without identity key", entity.type_name());
            return entity;
        };
        self.inner
            .lock()
            .items
            .entry(key)
            .or_insert(entity)
            .clone()
    }

    fn remove(&self, entity: &EntityRef) -> bool {
        let Some(key) = entity.key() else {
            return false;
        };
        let mut tables = self.inner.lock();
        let mapped = tables
            .items
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, entity));
        if mapped {
            tables.items.remove(&key);
        }
        let staged = tables
            .downloads
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, entity));
        if staged {
            tables.downloads.remove(&key);
        }
        mapped || staged
    }

    fn promote(&self, key: &EntityKey) -> Option<EntityRef> {
        let mut tables = self.inner.lock();
        let staged = tables.downloads.remove(key)?;
        let winner = tables.items.entry(key.clone()).or_insert(staged).clone();
        debug!("Promoted {} into identity map", key);
        Some(winner)
    }

    fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    fn staged_len(&self) -> usize {
        self.inner.lock().downloads.len()
    }

    fn entities(&self) -> Vec<EntityRef> {
        self.inner.lock().items.values().cloned().collect()
    }
}
