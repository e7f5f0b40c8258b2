//! Entity model for entcache.
//!
//! Defines the client-side object model the synchronisation codec works on:
//! - [`TypeDescriptor`]: cached, name-indexed property table per entity type
//! - [`Entity`]: an identity-tracked instance with its lifecycle status
//! - [`ChangeLedger`]: per-instance record of unsent local edits
//! - [`ReferenceCollection`]: one-to-many collection with stable identity
//! - [`IdentityMap`]: one instance per key, plus in-flight download staging
//! - [`EntityProvider`] / [`TypeRegistry`]: type and subtype resolution
//!
//! Instances are shared as [`EntityRef`] (`Arc<Entity>`); two handles name the
//! same entity exactly when they point at the same allocation.

mod collection;
mod descriptor;
mod entity;
mod error;
mod identity;
mod ledger;
mod registry;

pub use collection::{CollectionChange, CollectionListener, ListenerId, ReferenceCollection};
pub use descriptor::{PropertyDescriptor, PropertyKind, TypeDescriptor, TypeDescriptorBuilder};
pub use entity::{Entity, EntityRef, EntitySnapshot, LoadCheckpoint, PropertyValue};
pub use error::{ModelError, ModelResult};
pub use identity::{Claim, ClaimOrigin, IdentityMap, MemoryIdentityMap};
pub use ledger::{ChangeLedger, Original};
pub use registry::{EntityProvider, TypeRegistry};
