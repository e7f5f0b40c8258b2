//! Shared test fixtures for the entcache-sync integration tests.
//!
//! The schema models a small order book:
//! - `Customer` owns `orders` (inverse `Order.customer`)
//! - `Order` owns `lines` (inverse `Line.order`) and carries a read-only
//!   `created` stamp
//! - `Shape(0)` is the root of a polymorphic hierarchy with `Circle(1)` and
//!   `Square(2)`, collected by `Drawing.shapes`
//! - `Employee` references itself through `manager` / `reports`

#![allow(dead_code)]

use entcache_model::{EntityProvider, EntityRef, PropertyDescriptor, ReferenceCollection, TypeDescriptor, TypeRegistry};
use entcache_sync::{CodecConfig, SyncCodec};
use entcache_types::{EntityKey, KeyKind};
use std::sync::Arc;

pub fn make_registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            TypeDescriptor::builder("Customer")
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("name"))
                .property(PropertyDescriptor::collection("orders", "Order").inverse("customer"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::builder("Order")
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("number"))
                .property(PropertyDescriptor::attribute("total"))
                .property(PropertyDescriptor::attribute("created").read_only())
                .property(PropertyDescriptor::reference("customer", "Customer"))
                .property(PropertyDescriptor::collection("lines", "Line").inverse("order"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::builder("Line")
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("product"))
                .property(PropertyDescriptor::attribute("qty"))
                .property(PropertyDescriptor::reference("order", "Order"))
                .build()
                .unwrap(),
        )
        .unwrap();

    let shape = registry
        .register(
            TypeDescriptor::builder("Shape")
                .property(PropertyDescriptor::discriminator("kind"))
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("label"))
                .discriminator_value(0)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::builder("Circle")
                .extends(&shape)
                .discriminator_value(1)
                .property(PropertyDescriptor::attribute("radius"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::builder("Square")
                .extends(&shape)
                .discriminator_value(2)
                .property(PropertyDescriptor::attribute("side"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::builder("Drawing")
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("title"))
                .property(PropertyDescriptor::collection("shapes", "Shape"))
                .build()
                .unwrap(),
        )
        .unwrap();

    registry
        .register(
            TypeDescriptor::builder("Employee")
                .property(PropertyDescriptor::identity("id", KeyKind::Int))
                .property(PropertyDescriptor::attribute("name"))
                .property(PropertyDescriptor::reference("manager", "Employee"))
                .property(PropertyDescriptor::collection("reports", "Employee").inverse("manager"))
                .build()
                .unwrap(),
        )
        .unwrap();

    Arc::new(registry)
}

/// A codec over a fresh registry, plus the registry itself for creating
/// local instances and inspecting identity maps.
pub fn make_codec() -> (SyncCodec, Arc<TypeRegistry>) {
    make_codec_with(CodecConfig::default())
}

pub fn make_codec_with(config: CodecConfig) -> (SyncCodec, Arc<TypeRegistry>) {
    init_tracing();
    let registry = make_registry();
    let codec = SyncCodec::with_config(registry.clone(), config);
    (codec, registry)
}

/// Routes codec logs to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Decodes a payload that must yield an instance.
pub fn decode(codec: &SyncCodec, type_name: &str, json: &str) -> EntityRef {
    codec.decode(type_name, json).unwrap().unwrap()
}

/// The cached instance for an integer key, if any.
pub fn cached(registry: &TypeRegistry, type_name: &str, id: i64) -> Option<EntityRef> {
    registry
        .identity_map(type_name)
        .unwrap()
        .try_get(&EntityKey::Int(id))
}

pub fn staged(registry: &TypeRegistry, type_name: &str) -> usize {
    registry.identity_map(type_name).unwrap().staged_len()
}

/// Integer keys of a collection's members, in order.
pub fn member_ids(collection: &ReferenceCollection) -> Vec<i64> {
    collection
        .items()
        .iter()
        .map(|member| match member.key() {
            Some(EntityKey::Int(id)) => id,
            other => panic!("unexpected key {other:?}"),
        })
        .collect()
}
