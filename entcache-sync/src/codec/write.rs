//! Write path: serialises entities as a diff of local edits.
//!
//! Headers (discriminator, identity) always come first. What follows depends
//! on the instance status: `New` writes every writeable property, `Edit`
//! writes tracked properties with ledger entries plus untracked writeable
//! ones, and everything else writes headers only. Nested entities are
//! embedded only when they carry local changes, have not been written
//! earlier in the same call, and the remaining depth allows it. A nested
//! entity at the depth bound writes its attributes but no relationships.

use crate::policy::{JsonKeys, JsonPolicy};
use entcache_model::{Entity, EntityRef, PropertyDescriptor, PropertyValue, ReferenceCollection};
use entcache_types::LifecycleStatus;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

/// State shared by every view of one top-level encode call.
pub(crate) struct WriteContext<'a> {
    policy: &'a JsonPolicy,
    visited: RefCell<HashSet<*const Entity>>,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(policy: &'a JsonPolicy) -> Self {
        Self {
            policy,
            visited: RefCell::new(HashSet::new()),
        }
    }

    /// Marks `entity` as written. False if it already was.
    fn enter(&self, entity: &EntityRef) -> bool {
        self.visited.borrow_mut().insert(Arc::as_ptr(entity))
    }

    fn seen(&self, entity: &EntityRef) -> bool {
        self.visited.borrow().contains(&Arc::as_ptr(entity))
    }

    fn bare_keys(&self) -> bool {
        self.policy.keys.contains(JsonKeys::REF)
    }
}

/// Serialises one entity under a [`WriteContext`].
pub(crate) struct EntityView<'a> {
    ctx: &'a WriteContext<'a>,
    entity: EntityRef,
    /// Nesting levels still allowed below this entity; `None` is unbounded.
    remaining: Option<u32>,
    nested: bool,
}

impl<'a> EntityView<'a> {
    pub(crate) fn root(ctx: &'a WriteContext<'a>, entity: &EntityRef) -> Self {
        Self {
            ctx,
            entity: entity.clone(),
            remaining: ctx.policy.max_depth,
            nested: false,
        }
    }

    fn child(&self, entity: &EntityRef) -> Self {
        Self {
            ctx: self.ctx,
            entity: entity.clone(),
            remaining: self.remaining.map(|r| r.saturating_sub(1)),
            nested: true,
        }
    }

    /// A nested entity at the depth bound writes no relationships at all,
    /// not even links.
    fn at_depth_limit(&self) -> bool {
        self.nested && self.remaining == Some(0)
    }

    fn link(&self, entity: &EntityRef) -> Link {
        Link {
            entity: entity.clone(),
            bare: self.ctx.bare_keys(),
        }
    }

    /// True if `target` is written in full inside this entity.
    fn embeds(&self, target: &EntityRef, direction: JsonKeys) -> bool {
        let policy = self.ctx.policy;
        policy.keys.contains(direction)
            && self.remaining != Some(0)
            && !self.ctx.seen(target)
            && (policy.full_json || target.status().has_local_changes())
    }

    fn write_reference<M: SerializeMap>(
        &self,
        map: &mut M,
        property: &PropertyDescriptor,
        slot: bool,
        target: Option<&EntityRef>,
    ) -> Result<(), M::Error> {
        match target {
            None if slot => map.serialize_entry(&property.name, &Value::Null),
            None => Ok(()),
            Some(target) if self.embeds(target, JsonKeys::REFERENCED) => {
                map.serialize_entry(&property.name, &self.child(target))
            }
            Some(target) if slot => map.serialize_entry(&property.name, &self.link(target)),
            Some(_) => Ok(()),
        }
    }

    fn write_collection<M: SerializeMap>(
        &self,
        map: &mut M,
        property: &PropertyDescriptor,
        slot: bool,
        collection: &ReferenceCollection,
    ) -> Result<(), M::Error> {
        if !self.ctx.policy.keys.contains(JsonKeys::REFERENCING) {
            return Ok(());
        }
        // A collection in the payload lists its whole membership; otherwise
        // only members with changes of their own are written.
        let members: Vec<Member<'_>> = collection
            .items()
            .iter()
            .filter_map(|member| {
                if self.embeds(member, JsonKeys::REFERENCING) {
                    Some(Member::Embed(self.child(member)))
                } else if slot {
                    Some(Member::Link(self.link(member)))
                } else {
                    None
                }
            })
            .collect();
        if members.is_empty() && !slot {
            return Ok(());
        }
        map.serialize_entry(&property.name, &members)
    }
}

impl Serialize for EntityView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.ctx.enter(&self.entity) {
            // Written earlier in this call; a sibling branch got there first.
            return self.link(&self.entity).serialize(serializer);
        }
        let descriptor = self.entity.descriptor();
        let snapshot = self.entity.snapshot();
        let full = self.ctx.policy.full_json;

        let mut map = serializer.serialize_map(None)?;
        write_headers(&mut map, &self.entity)?;
        if !full && !snapshot.status.has_local_changes() {
            return map.end();
        }

        for (index, property) in descriptor.properties().iter().enumerate() {
            if property.is_header() || (!full && (property.read_only || !property.writeable)) {
                continue;
            }
            let slot = full
                || match snapshot.status {
                    LifecycleStatus::New => true,
                    LifecycleStatus::Edit => {
                        !property.change_sensitive || snapshot.dirty.contains(&index)
                    }
                    _ => false,
                };
            match &snapshot.values[index] {
                PropertyValue::Attribute(value) => {
                    if slot {
                        map.serialize_entry(&property.name, value)?;
                    }
                }
                PropertyValue::Reference(_) | PropertyValue::Collection(_)
                    if self.at_depth_limit() => {}
                PropertyValue::Reference(target) => {
                    self.write_reference(&mut map, property, slot, target.as_ref())?;
                }
                PropertyValue::Collection(collection) => {
                    self.write_collection(&mut map, property, slot, collection)?;
                }
            }
        }
        map.end()
    }
}

/// A collection member: written in full or as a link.
enum Member<'a> {
    Embed(EntityView<'a>),
    Link(Link),
}

impl Serialize for Member<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Embed(view) => view.serialize(serializer),
            Self::Link(link) => link.serialize(serializer),
        }
    }
}

/// A reference to an entity that is not embedded: its bare key, or an
/// object holding only its headers.
struct Link {
    entity: EntityRef,
    bare: bool,
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.bare {
            if let Some(key) = self.entity.key() {
                return key.serialize(serializer);
            }
        }
        let mut map = serializer.serialize_map(None)?;
        write_headers(&mut map, &self.entity)?;
        map.end()
    }
}

fn write_headers<M: SerializeMap>(map: &mut M, entity: &Entity) -> Result<(), M::Error> {
    let descriptor = entity.descriptor();
    if let (Some(property), Some(value)) = (descriptor.discriminator(), descriptor.discriminator_value()) {
        map.serialize_entry(&property.name, &value)?;
    }
    if let Some(key) = entity.key() {
        map.serialize_entry(&descriptor.identity().name, &key)?;
    }
    Ok(())
}
