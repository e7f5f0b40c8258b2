//! The synchronisation codec.
//!
//! [`SyncCodec`] reads JSON into cached instances (one per identity, local
//! edits preserved, collections reconciled) and writes instances back out as
//! a diff of local edits bounded by a [`JsonPolicy`].

mod read;
mod write;

use crate::config::CodecConfig;
use crate::policy::JsonPolicy;
use crate::reconcile::ReconcileStats;
use crate::{CodecError, CodecResult};
use entcache_model::{EntityProvider, EntityRef, TypeDescriptor};
use entcache_types::EntityKey;
use http::HeaderMap;
use read::{DecodeContext, EntitySeed, ListSeed};
use serde::de::DeserializeSeed;
use std::io;
use std::sync::Arc;
use tracing::warn;
use write::{EntityView, WriteContext};

/// An incoming value dropped because the property holds a pending local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub type_name: String,
    pub key: Option<EntityKey>,
    pub property: String,
}

/// What one decode call did besides returning the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Local edits that won over incoming values.
    pub conflicts: Vec<Conflict>,
    /// Identities this call created blank instances for.
    pub created: Vec<EntityKey>,
    /// Identities this call moved from staging into an identity map.
    pub promoted: Vec<EntityKey>,
    /// Collection merge counters.
    pub reconciled: ReconcileStats,
}

impl DecodeReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Reads and writes entities against an [`EntityProvider`].
pub struct SyncCodec {
    provider: Arc<dyn EntityProvider>,
    config: CodecConfig,
}

impl SyncCodec {
    pub fn new(provider: Arc<dyn EntityProvider>) -> Self {
        Self::with_config(provider, CodecConfig::default())
    }

    pub fn with_config(provider: Arc<dyn EntityProvider>, config: CodecConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn EntityProvider> {
        &self.provider
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Policy for a request: the configured defaults overridden by headers.
    pub fn policy_from_headers(&self, headers: &HeaderMap) -> CodecResult<JsonPolicy> {
        self.config.policy().merge_headers(headers)
    }

    pub fn descriptor(&self, type_name: &str) -> CodecResult<Arc<TypeDescriptor>> {
        self.provider
            .descriptor(type_name)
            .ok_or_else(|| CodecError::UnknownType(type_name.to_string()))
    }

    /// Runs one top-level decode, preferring the typed error a seed recorded
    /// over the generic one serde reports.
    fn run<T>(
        &self,
        f: impl FnOnce(&DecodeContext<'_>) -> Result<T, serde_json::Error>,
    ) -> CodecResult<(T, DecodeReport)> {
        let ctx = DecodeContext::new(self.provider.as_ref());
        match f(&ctx) {
            Ok(value) => Ok((value, ctx.take_report())),
            Err(error) => Err(ctx.take_fault().unwrap_or(CodecError::Json(error))),
        }
    }

    // ── Read path ────────────────────────────────────────────────

    /// Decodes one object of `type_name` (or a subtype named by its
    /// discriminator). `null` decodes to `None`.
    pub fn decode(&self, type_name: &str, json: &str) -> CodecResult<Option<EntityRef>> {
        self.decode_with_report(type_name, json).map(|(entity, _)| entity)
    }

    pub fn decode_with_report(
        &self,
        type_name: &str,
        json: &str,
    ) -> CodecResult<(Option<EntityRef>, DecodeReport)> {
        let descriptor = self.descriptor(type_name)?;
        self.run(|ctx| {
            let mut de = serde_json::Deserializer::from_str(json);
            let entity = EntitySeed::root(ctx, descriptor, None).deserialize(&mut de)?;
            de.end()?;
            Ok(entity)
        })
    }

    /// Decodes one object streamed from `reader`.
    pub fn decode_reader<R: io::Read>(
        &self,
        type_name: &str,
        reader: R,
    ) -> CodecResult<Option<EntityRef>> {
        let descriptor = self.descriptor(type_name)?;
        let (entity, _) = self.run(|ctx| {
            let mut de = serde_json::Deserializer::from_reader(reader);
            let entity = EntitySeed::root(ctx, descriptor, None).deserialize(&mut de)?;
            de.end()?;
            Ok(entity)
        })?;
        Ok(entity)
    }

    /// Refreshes a known instance from a payload. Payload properties may
    /// precede the identity key, which must match the instance's key if
    /// both are present.
    pub fn decode_into(&self, target: &EntityRef, json: &str) -> CodecResult<DecodeReport> {
        let descriptor = target.descriptor();
        let (_, report) = self.run(|ctx| {
            let mut de = serde_json::Deserializer::from_str(json);
            let entity =
                EntitySeed::root(ctx, descriptor, Some(target.clone())).deserialize(&mut de)?;
            de.end()?;
            Ok(entity)
        })?;
        Ok(report)
    }

    /// Decodes a top-level array. `null` members are dropped.
    pub fn decode_list(&self, type_name: &str, json: &str) -> CodecResult<Vec<EntityRef>> {
        let descriptor = self.descriptor(type_name)?;
        let (entities, _) = self.run(|ctx| {
            let mut de = serde_json::Deserializer::from_str(json);
            let entities = ListSeed { ctx, descriptor }.deserialize(&mut de)?;
            de.end()?;
            Ok(entities)
        })?;
        Ok(entities)
    }

    /// Merges the server's answer to a save: local changes are accepted
    /// (a `New` instance becomes `Actual`), the echo is decoded into the
    /// instance, and the instance is added to its identity map.
    pub fn apply_saved(&self, entity: &EntityRef, json: &str) -> CodecResult<DecodeReport> {
        entity.accept_changes();
        let report = self.decode_into(entity, json)?;
        if entity.key().is_some() {
            if let Some(map) = self.provider.identity_map(&entity.type_name()) {
                let mapped = map.add(entity.clone());
                if !Arc::ptr_eq(&mapped, entity) {
                    warn!(
                        "{} {:?} is already cached, saved instance left unmapped",
                        entity.type_name(),
                        entity.key()
                    );
                }
            }
        }
        Ok(report)
    }

    // ── Write path ───────────────────────────────────────────────

    pub fn encode(&self, entity: &EntityRef, policy: &JsonPolicy) -> CodecResult<String> {
        let ctx = WriteContext::new(policy);
        Ok(serde_json::to_string(&EntityView::root(&ctx, entity))?)
    }

    pub fn encode_value(
        &self,
        entity: &EntityRef,
        policy: &JsonPolicy,
    ) -> CodecResult<serde_json::Value> {
        let ctx = WriteContext::new(policy);
        Ok(serde_json::to_value(EntityView::root(&ctx, entity))?)
    }

    /// Encodes several entities in one pass; an entity already written
    /// inside an earlier one is written as a link.
    pub fn encode_list(&self, entities: &[EntityRef], policy: &JsonPolicy) -> CodecResult<String> {
        let ctx = WriteContext::new(policy);
        let views: Vec<EntityView<'_>> = entities
            .iter()
            .map(|entity| EntityView::root(&ctx, entity))
            .collect();
        Ok(serde_json::to_string(&views)?)
    }

    pub fn encode_to_writer<W: io::Write>(
        &self,
        writer: W,
        entity: &EntityRef,
        policy: &JsonPolicy,
    ) -> CodecResult<()> {
        let ctx = WriteContext::new(policy);
        serde_json::to_writer(writer, &EntityView::root(&ctx, entity))?;
        Ok(())
    }
}
