use entcache_model::{
    ClaimOrigin, Entity, EntityRef, IdentityMap, MemoryIdentityMap, PropertyDescriptor,
    TypeDescriptor,
};
use entcache_types::{EntityKey, KeyKind};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

fn make_descriptor() -> Arc<TypeDescriptor> {
    Arc::new(
        TypeDescriptor::builder("Item")
            .property(PropertyDescriptor::identity("id", KeyKind::Int))
            .build()
            .unwrap(),
    )
}

fn factory(descriptor: &Arc<TypeDescriptor>, key: &EntityKey) -> impl Fn() -> EntityRef {
    let descriptor = descriptor.clone();
    let key = key.clone();
    move || Entity::blank(descriptor.clone(), key.clone())
}

// ── Add / lookup / remove ────────────────────────────────────────

#[test]
fn add_then_get() {
    let map = MemoryIdentityMap::new();
    let item = Entity::blank(make_descriptor(), EntityKey::Int(1));
    let stored = map.add(item.clone());

    assert!(Arc::ptr_eq(&stored, &item));
    assert!(Arc::ptr_eq(&map.try_get(&EntityKey::Int(1)).unwrap(), &item));
    assert_eq!(map.len(), 1);
}

#[test]
fn add_keeps_existing_instance() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let first = Entity::blank(desc.clone(), EntityKey::Int(1));
    let second = Entity::blank(desc, EntityKey::Int(1));

    map.add(first.clone());
    let winner = map.add(second);

    assert!(Arc::ptr_eq(&winner, &first));
    assert_eq!(map.len(), 1);
}

#[test]
fn add_without_key_is_ignored() {
    let map = MemoryIdentityMap::new();
    map.add(Entity::new(make_descriptor()));
    assert!(map.is_empty());
}

#[test]
fn remove_requires_exact_instance() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let mapped = Entity::blank(desc.clone(), EntityKey::Int(1));
    let impostor = Entity::blank(desc, EntityKey::Int(1));
    map.add(mapped.clone());

    assert!(!map.remove(&impostor));
    assert!(map.remove(&mapped));
    assert!(map.try_get(&EntityKey::Int(1)).is_none());
}

// ── Claim / promote ──────────────────────────────────────────────

#[test]
fn claim_stages_then_joins() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let key = EntityKey::Int(7);

    let first = map.claim(&key, &factory(&desc, &key));
    let second = map.claim(&key, &factory(&desc, &key));

    assert_eq!(first.origin, ClaimOrigin::Created);
    assert_eq!(second.origin, ClaimOrigin::Joined);
    assert!(second.is_staged());
    assert!(Arc::ptr_eq(&first.entity, &second.entity));
    assert_eq!(map.staged_len(), 1);
    assert!(map.try_get(&key).is_none());
}

#[test]
fn claim_returns_cached_instance() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let key = EntityKey::Int(7);
    let cached = map.add(Entity::blank(desc.clone(), key.clone()));

    let claim = map.claim(&key, &factory(&desc, &key));
    assert_eq!(claim.origin, ClaimOrigin::Cached);
    assert!(!claim.is_staged());
    assert!(Arc::ptr_eq(&claim.entity, &cached));
    assert_eq!(map.staged_len(), 0);
}

#[test]
fn promote_moves_staged_into_map() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let key = EntityKey::Int(3);
    let claim = map.claim(&key, &factory(&desc, &key));

    let promoted = map.promote(&key).unwrap();
    assert!(Arc::ptr_eq(&promoted, &claim.entity));
    assert_eq!(map.staged_len(), 0);
    assert!(map.try_get(&key).is_some());
    assert!(map.promote(&key).is_none());
}

#[test]
fn release_drops_staging_only() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let key = EntityKey::Int(3);
    map.claim(&key, &factory(&desc, &key));

    assert!(map.release(&key).is_some());
    assert_eq!(map.staged_len(), 0);
    assert!(map.is_empty());
}

#[test]
fn remove_also_clears_staged_instance() {
    let map = MemoryIdentityMap::new();
    let desc = make_descriptor();
    let key = EntityKey::Int(3);
    let claim = map.claim(&key, &factory(&desc, &key));

    assert!(map.remove(&claim.entity));
    assert_eq!(map.staged_len(), 0);
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn concurrent_claims_share_one_instance() {
    let map: Arc<dyn IdentityMap> = MemoryIdentityMap::shared();
    let desc = make_descriptor();
    let key = EntityKey::Int(42);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let map = map.clone();
            let desc = desc.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                map.claim(&key, &factory(&desc, &key))
            })
        })
        .collect();

    let claims: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let created = claims
        .iter()
        .filter(|c| c.origin == ClaimOrigin::Created)
        .count();
    assert_eq!(created, 1);
    assert!(claims.iter().all(|c| Arc::ptr_eq(&c.entity, &claims[0].entity)));
}

proptest! {
    #[test]
    fn claims_never_duplicate_keys(keys in proptest::collection::vec(0i64..16, 1..64)) {
        let map = MemoryIdentityMap::new();
        let desc = make_descriptor();
        let mut seen: Vec<(i64, EntityRef)> = Vec::new();

        for id in keys {
            let key = EntityKey::Int(id);
            let claim = map.claim(&key, &factory(&desc, &key));
            match seen.iter().find(|(k, _)| *k == id) {
                Some((_, first)) => prop_assert!(Arc::ptr_eq(first, &claim.entity)),
                None => {
                    prop_assert_eq!(claim.origin, ClaimOrigin::Created);
                    seen.push((id, claim.entity));
                }
            }
        }
        prop_assert_eq!(map.staged_len(), seen.len());
    }
}
