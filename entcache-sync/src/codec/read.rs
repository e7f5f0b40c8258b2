//! Read path: streams a JSON object into the cached instance for its identity.
//!
//! Each object is read in two phases. The header phase consumes the
//! discriminator (switching to the concrete subtype) and the identity key
//! (resolving the one instance for that key). The body phase merges every
//! remaining property into that instance, skipping properties with pending
//! local edits and reconciling collections in place.

use super::{Conflict, DecodeReport};
use crate::reconcile::{ReconcileStats, Reconciler};
use crate::CodecError;
use entcache_model::{
    ClaimOrigin, Entity, EntityProvider, EntityRef, IdentityMap, LoadCheckpoint,
    PropertyDescriptor, PropertyKind, PropertyValue, ReferenceCollection, TypeDescriptor,
};
use entcache_types::{EntityKey, LifecycleStatus};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Unexpected, Visitor};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// State shared by every seed of one top-level decode call.
pub(crate) struct DecodeContext<'a> {
    provider: &'a dyn EntityProvider,
    report: RefCell<DecodeReport>,
    fault: RefCell<Option<CodecError>>,
}

impl<'a> DecodeContext<'a> {
    pub(crate) fn new(provider: &'a dyn EntityProvider) -> Self {
        Self {
            provider,
            report: RefCell::new(DecodeReport::default()),
            fault: RefCell::new(None),
        }
    }

    pub(crate) fn take_report(&self) -> DecodeReport {
        self.report.take()
    }

    /// The typed error behind a failed decode, if one was raised by a seed.
    pub(crate) fn take_fault(&self) -> Option<CodecError> {
        self.fault.take()
    }

    /// Records `error` (the innermost one wins) and converts it for serde.
    fn fail<E: de::Error>(&self, error: CodecError) -> E {
        let message = error.to_string();
        let mut fault = self.fault.borrow_mut();
        if fault.is_none() {
            *fault = Some(error);
        }
        E::custom(message)
    }

    fn parse_key<E: de::Error>(&self, descriptor: &TypeDescriptor, raw: &Value) -> Result<EntityKey, E> {
        EntityKey::from_json(descriptor.key_kind(), raw).map_err(|_| {
            self.fail(CodecError::InvalidKey {
                type_name: descriptor.name().to_string(),
                value: raw.to_string(),
            })
        })
    }

    /// Resolves the concrete subtype named by a discriminator value. Unknown
    /// values keep the static type.
    fn dispatch(&self, descriptor: Arc<TypeDescriptor>, raw: &Value) -> Arc<TypeDescriptor> {
        let value = match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .and_then(|v| i32::try_from(v).ok());
        let Some(value) = value else {
            warn!("Ignoring malformed discriminator {} on {}", raw, descriptor.name());
            return descriptor;
        };
        if descriptor.discriminator_value() == Some(value) {
            return descriptor;
        }
        match self.provider.resolve_by_discriminator(descriptor.name(), value) {
            Some(concrete) => {
                debug!("Dispatching {} payload to subtype {}", descriptor.name(), concrete.name());
                concrete
            }
            None => {
                warn!(
                    "Unknown discriminator {} for {}, decoding as the static type",
                    value,
                    descriptor.name()
                );
                descriptor
            }
        }
    }

    /// Returns the one instance for `key`, staging a blank one if nobody has.
    /// A cached instance of a base type is narrowed to `descriptor` when the
    /// payload names a subtype of it.
    fn claim(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        key: EntityKey,
    ) -> Result<(EntityRef, Option<Staging>), CodecError> {
        let map = self
            .provider
            .identity_map(descriptor.name())
            .ok_or_else(|| CodecError::NoIdentityMap(descriptor.name().to_string()))?;
        let factory = || Entity::blank(descriptor.clone(), key.clone());
        let claim = map.claim(&key, &factory);
        self.narrow(&claim.entity, descriptor);
        match claim.origin {
            ClaimOrigin::Cached | ClaimOrigin::Joined => Ok((claim.entity, None)),
            ClaimOrigin::Created => {
                self.report.borrow_mut().created.push(key.clone());
                Ok((claim.entity, Some(Staging::new(map, key))))
            }
        }
    }

    fn narrow(&self, instance: &EntityRef, descriptor: &Arc<TypeDescriptor>) {
        let current = instance.descriptor();
        if current.name() == descriptor.name() || current.is_a(descriptor.name()) {
            return;
        }
        if instance.narrow_to(descriptor) {
            debug!(
                "Narrowed {} {:?} to subtype {}",
                current.name(),
                instance.key(),
                descriptor.name()
            );
        } else {
            warn!(
                "Payload typed {} resolves to cached {} {:?}, decoding as {}",
                descriptor.name(),
                current.name(),
                instance.key(),
                current.name()
            );
        }
    }

    /// Moves a staged instance into the identity map. Returns the instance
    /// the map holds afterwards.
    fn promote(&self, staging: Staging, instance: EntityRef) -> EntityRef {
        let Some((key, winner)) = staging.promote() else {
            return instance;
        };
        debug!("Promoted {} {} into identity map", instance.type_name(), key);
        self.report.borrow_mut().promoted.push(key);
        if Arc::ptr_eq(&winner, &instance) {
            instance
        } else {
            debug!("Identity race lost for {}, continuing with the mapped instance", instance.type_name());
            winner
        }
    }

    fn target_descriptor(
        &self,
        owner: &TypeDescriptor,
        property: &str,
        target: &str,
    ) -> Option<Arc<TypeDescriptor>> {
        let found = self.provider.descriptor(target);
        if found.is_none() {
            warn!("Skipping {}.{}: unknown target type {}", owner.name(), property, target);
        }
        found
    }

    fn conflict(&self, instance: &Entity, property: &PropertyDescriptor) {
        debug!("Keeping local edit of {}.{}", instance.type_name(), property.name);
        self.report.borrow_mut().conflicts.push(Conflict {
            type_name: instance.type_name(),
            key: instance.key(),
            property: property.name.clone(),
        });
    }

    fn reconciled(&self, stats: ReconcileStats) {
        self.report.borrow_mut().reconciled += stats;
    }
}

/// A download staged by this decode call. Released again if the decode
/// fails before the instance is promoted.
struct Staging {
    map: Arc<dyn IdentityMap>,
    key: Option<EntityKey>,
}

impl Staging {
    fn new(map: Arc<dyn IdentityMap>, key: EntityKey) -> Self {
        Self { map, key: Some(key) }
    }

    fn promote(mut self) -> Option<(EntityKey, EntityRef)> {
        let key = self.key.take()?;
        let winner = self.map.promote(&key)?;
        Some((key, winner))
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            debug!("Releasing staged download of {} after failed decode", key);
            self.map.release(&key);
        }
    }
}

/// Role of a property name in the header phase.
enum Role {
    Discriminator,
    Identity,
    Body,
    Unknown,
}

fn role(descriptor: &TypeDescriptor, name: &str) -> Role {
    match descriptor.property(name) {
        None => Role::Unknown,
        Some((_, property)) if property.identity => Role::Identity,
        Some((_, property)) if property.discriminator => Role::Discriminator,
        Some(_) => Role::Body,
    }
}

/// Decodes one entity object (or `null`) into its cached instance.
pub(crate) struct EntitySeed<'a> {
    ctx: &'a DecodeContext<'a>,
    descriptor: Arc<TypeDescriptor>,
    target: Option<EntityRef>,
    /// Nesting depth; 0 for a top-level object.
    depth: usize,
    /// Accept a bare identity key in place of an object.
    scalar_key: bool,
}

impl<'a> EntitySeed<'a> {
    pub(crate) fn root(
        ctx: &'a DecodeContext<'a>,
        descriptor: Arc<TypeDescriptor>,
        target: Option<EntityRef>,
    ) -> Self {
        Self {
            ctx,
            descriptor,
            target,
            depth: 0,
            scalar_key: false,
        }
    }

    fn nested(ctx: &'a DecodeContext<'a>, descriptor: Arc<TypeDescriptor>, depth: usize) -> Self {
        Self {
            ctx,
            descriptor,
            target: None,
            depth,
            scalar_key: true,
        }
    }

    /// Resolves a bare key through the identity map. An unknown key gets a
    /// blank stub, promoted at once since no payload will follow.
    fn scalar<E: de::Error>(self, raw: Value) -> Result<Option<EntityRef>, E> {
        if !self.scalar_key {
            return Err(E::invalid_type(Unexpected::Other("bare identity key"), &self));
        }
        let ctx = self.ctx;
        let key = ctx.parse_key::<E>(&self.descriptor, &raw)?;
        let (entity, staging) = ctx
            .claim(&self.descriptor, key)
            .map_err(|e| ctx.fail::<E>(e))?;
        Ok(Some(match staging {
            Some(staging) => ctx.promote(staging, entity),
            None => entity,
        }))
    }
}

impl<'de> DeserializeSeed<'de> for EntitySeed<'_> {
    type Value = Option<EntityRef>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for EntitySeed<'_> {
    type Value = Option<EntityRef>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a {} object", self.descriptor.name())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        self.scalar(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        self.scalar(Value::from(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        self.scalar(Value::from(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let ctx = self.ctx;
        let mut descriptor = match &self.target {
            Some(target) => target.descriptor(),
            None => self.descriptor,
        };
        let mut instance = self.target;
        let mut staging = None;
        let mut first_body = None;

        while let Some(name) = map.next_key::<String>()? {
            match role(&descriptor, &name) {
                Role::Discriminator => {
                    let raw: Value = map.next_value()?;
                    if instance.is_none() {
                        descriptor = ctx.dispatch(descriptor, &raw);
                    }
                }
                Role::Identity => {
                    let raw: Value = map.next_value()?;
                    let key = ctx.parse_key::<A::Error>(&descriptor, &raw)?;
                    match &instance {
                        Some(existing) => existing
                            .assign_key(key)
                            .map_err(|e| ctx.fail::<A::Error>(e.into()))?,
                        None => {
                            let (entity, staged) = ctx
                                .claim(&descriptor, key)
                                .map_err(|e| ctx.fail::<A::Error>(e))?;
                            // The rest of the object follows the instance's type.
                            descriptor = entity.descriptor();
                            instance = Some(entity);
                            staging = staged;
                        }
                    }
                }
                Role::Unknown => {
                    debug!("Skipping unknown property {}.{}", descriptor.name(), name);
                    map.next_value::<IgnoredAny>()?;
                }
                Role::Body => {
                    if instance.is_none() {
                        return Err(ctx.fail(CodecError::IdentityNotResolved {
                            type_name: descriptor.name().to_string(),
                            property: name,
                        }));
                    }
                    first_body = Some(name);
                    break;
                }
            }
        }

        let Some(instance) = instance else {
            return Err(ctx.fail(CodecError::MissingIdentity {
                type_name: descriptor.name().to_string(),
            }));
        };
        if let Some(name) = first_body {
            let body = BodyReader {
                ctx,
                instance: &instance,
                depth: self.depth,
            };
            body.read(name, &mut map)?;
        }
        Ok(Some(match staging {
            Some(staging) => ctx.promote(staging, instance),
            None => instance,
        }))
    }
}

/// Merges the payload properties of one object into a resolved instance.
struct BodyReader<'r, 'a> {
    ctx: &'a DecodeContext<'a>,
    instance: &'r EntityRef,
    depth: usize,
}

impl BodyReader<'_, '_> {
    fn read<'de, A: MapAccess<'de>>(&self, first: String, map: &mut A) -> Result<(), A::Error> {
        // Decode passes into one instance are serialised per top-level object.
        let _guard = if self.depth == 0 {
            Some(self.instance.lock_decode())
        } else {
            None
        };
        let descriptor = self.instance.descriptor();
        let mut pass: Option<LoadPass<'_>> = None;
        let mut next = Some(first);

        while let Some(name) = next {
            match descriptor.property(&name) {
                None => {
                    debug!("Skipping unknown property {}.{}", descriptor.name(), name);
                    map.next_value::<IgnoredAny>()?;
                }
                Some((_, property)) if property.is_header() => {
                    map.next_value::<IgnoredAny>()?;
                }
                Some((index, property)) => {
                    if pass.is_none() {
                        pass = Some(LoadPass::begin(self.instance));
                    }
                    self.read_property(index, property, map)?;
                }
            }
            next = map.next_key::<String>()?;
        }

        if let Some(status) = pass.and_then(LoadPass::commit) {
            debug!(
                "Refreshed {} {:?}, now {}",
                descriptor.name(),
                self.instance.key(),
                status
            );
        }
        Ok(())
    }

    fn read_property<'de, A: MapAccess<'de>>(
        &self,
        index: usize,
        property: &PropertyDescriptor,
        map: &mut A,
    ) -> Result<(), A::Error> {
        let ctx = self.ctx;
        let owner = self.instance.descriptor();

        match &property.kind {
            PropertyKind::Attribute => {
                let value: Value = map.next_value()?;
                if self.instance.is_pending_at(index) {
                    ctx.conflict(self.instance, property);
                } else {
                    self.instance
                        .apply_incoming(index, PropertyValue::Attribute(value));
                }
            }
            PropertyKind::Reference { target } => {
                let Some(target) = ctx.target_descriptor(&owner, &property.name, target) else {
                    map.next_value::<IgnoredAny>()?;
                    return Ok(());
                };
                let value = map.next_value_seed(EntitySeed::nested(ctx, target, self.depth + 1))?;
                if self.instance.is_pending_at(index) {
                    ctx.conflict(self.instance, property);
                } else {
                    self.instance
                        .apply_incoming(index, PropertyValue::Reference(value));
                }
            }
            PropertyKind::Collection { target, .. } => {
                let target = ctx.target_descriptor(&owner, &property.name, target);
                let (Some(target), Some(collection)) = (target, self.instance.collection_at(index))
                else {
                    map.next_value::<IgnoredAny>()?;
                    return Ok(());
                };
                // Only an explicit membership edit blocks the merge; a `New`
                // owner takes the incoming array as is.
                let mode = if self.instance.is_edited_at(index) {
                    ctx.conflict(self.instance, property);
                    CollectionMode::Skip
                } else if self.instance.status() == LifecycleStatus::Load {
                    CollectionMode::Reconcile
                } else {
                    CollectionMode::Replace
                };
                map.next_value_seed(CollectionSeed {
                    ctx,
                    descriptor: target,
                    collection,
                    mode,
                    depth: self.depth + 1,
                })?;
            }
        }
        Ok(())
    }
}

/// One body pass into an instance. Dropped without [`LoadPass::commit`]
/// (a payload error unwinding through the body), it puts back what the pass
/// overwrote and leaves `Load`.
struct LoadPass<'r> {
    instance: &'r EntityRef,
    checkpoint: Option<LoadCheckpoint>,
}

impl<'r> LoadPass<'r> {
    fn begin(instance: &'r EntityRef) -> Self {
        Self {
            instance,
            checkpoint: Some(instance.begin_pass()),
        }
    }

    /// Completes the pass. Returns the status after `Load` if the pass
    /// started one.
    fn commit(mut self) -> Option<LifecycleStatus> {
        let checkpoint = self.checkpoint.take()?;
        checkpoint
            .entered_load()
            .then(|| self.instance.finish_load())
    }
}

impl Drop for LoadPass<'_> {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            debug!(
                "Rolling back failed decode of {} {:?} to {}",
                self.instance.type_name(),
                self.instance.key(),
                checkpoint.status()
            );
            self.instance.abort_load(checkpoint);
        }
    }
}

/// How an incoming array is applied to an existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectionMode {
    /// Owner is refreshing: diff against the current members.
    Reconcile,
    /// No refresh in progress: take the incoming array as is.
    Replace,
    /// Pending local edit: decode the members, keep the membership.
    Skip,
}

/// Decodes an array of entities into an owner's collection. `null` is read
/// as an empty array.
struct CollectionSeed<'a> {
    ctx: &'a DecodeContext<'a>,
    descriptor: Arc<TypeDescriptor>,
    collection: Arc<ReferenceCollection>,
    mode: CollectionMode,
    depth: usize,
}

impl<'a> CollectionSeed<'a> {
    fn element(&self) -> EntitySeed<'a> {
        EntitySeed::nested(self.ctx, self.descriptor.clone(), self.depth)
    }

    fn apply(&self, incoming: Vec<EntityRef>) {
        match self.mode {
            CollectionMode::Reconcile => {
                let mut reconciler = Reconciler::new(&self.collection);
                for entity in incoming {
                    reconciler.observe(entity);
                }
                self.ctx.reconciled(reconciler.finish());
            }
            CollectionMode::Replace => {
                let mut members: Vec<EntityRef> = Vec::with_capacity(incoming.len());
                for entity in incoming {
                    if !members.iter().any(|m| Arc::ptr_eq(m, &entity)) {
                        members.push(entity);
                    }
                }
                self.collection.replace_incoming(members);
                self.ctx.reconciled(ReconcileStats {
                    replaced: 1,
                    ..ReconcileStats::default()
                });
            }
            CollectionMode::Skip => {}
        }
    }
}

impl<'de> DeserializeSeed<'de> for CollectionSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for CollectionSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an array of {} objects", self.descriptor.name())
    }

    fn visit_unit<E: de::Error>(self) -> Result<(), E> {
        self.apply(Vec::new());
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        let mut incoming = Vec::new();
        while let Some(item) = seq.next_element_seed(self.element())? {
            incoming.extend(item);
        }
        self.apply(incoming);
        Ok(())
    }
}

/// Decodes a top-level array of entities. `null` yields an empty list.
pub(crate) struct ListSeed<'a> {
    pub(crate) ctx: &'a DecodeContext<'a>,
    pub(crate) descriptor: Arc<TypeDescriptor>,
}

impl<'de> DeserializeSeed<'de> for ListSeed<'_> {
    type Value = Vec<EntityRef>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for ListSeed<'_> {
    type Value = Vec<EntityRef>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an array of {} objects", self.descriptor.name())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::new();
        while let Some(item) =
            seq.next_element_seed(EntitySeed::root(self.ctx, self.descriptor.clone(), None))?
        {
            out.extend(item);
        }
        Ok(out)
    }
}
