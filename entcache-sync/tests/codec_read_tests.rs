mod common;

use common::{cached, decode, make_codec, member_ids, staged};
use entcache_model::{Entity, EntityProvider, ModelError};
use entcache_sync::{CodecError, Conflict};
use entcache_types::{EntityKey, LifecycleStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

// ── Identity resolution ──────────────────────────────────────────

#[test]
fn decode_creates_and_maps_instance() {
    let (codec, registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A-1","total":10}"#);

    assert_eq!(order.type_name(), "Order");
    assert_eq!(order.key(), Some(EntityKey::Int(1)));
    assert_eq!(order.status(), LifecycleStatus::Actual);
    assert_eq!(order.get("number"), Some(json!("A-1")));
    assert!(Arc::ptr_eq(&cached(&registry, "Order", 1).unwrap(), &order));
    assert_eq!(staged(&registry, "Order"), 0);
}

#[test]
fn same_identity_yields_same_instance() {
    let (codec, _registry) = make_codec();
    let first = decode(&codec, "Order", r#"{"id":1,"total":10}"#);
    let second = decode(&codec, "Order", r#"{"id":1,"total":12}"#);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.get("total"), Some(json!(12)));
}

#[test]
fn quoted_integer_key_resolves_same_instance() {
    let (codec, _registry) = make_codec();
    let first = decode(&codec, "Order", r#"{"id":1}"#);
    let second = decode(&codec, "Order", r#"{"id":"1"}"#);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn null_decodes_to_none() {
    let (codec, _registry) = make_codec();
    assert!(codec.decode("Order", "null").unwrap().is_none());
}

#[test]
fn decode_joins_staged_download() {
    let (codec, registry) = make_codec();
    let map = registry.identity_map("Order").unwrap();
    let descriptor = registry.descriptor("Order").unwrap();
    let factory = || Entity::blank(descriptor.clone(), EntityKey::Int(5));
    let claim = map.claim(&EntityKey::Int(5), &factory);

    let (joined, report) = codec
        .decode_with_report("Order", r#"{"id":5,"number":"x"}"#)
        .unwrap();
    let joined = joined.unwrap();

    assert!(Arc::ptr_eq(&joined, &claim.entity));
    assert_eq!(joined.get("number"), Some(json!("x")));
    // The first claimant still owns the promotion.
    assert!(report.promoted.is_empty());
    assert_eq!(staged(&registry, "Order"), 1);
    assert!(cached(&registry, "Order", 5).is_none());
}

#[test]
fn report_lists_created_and_promoted_keys() {
    let (codec, _registry) = make_codec();
    let (_, report) = codec
        .decode_with_report("Order", r#"{"id":1,"customer":7}"#)
        .unwrap();

    assert_eq!(report.created, vec![EntityKey::Int(1), EntityKey::Int(7)]);
    assert_eq!(report.promoted, vec![EntityKey::Int(7), EntityKey::Int(1)]);

    let (_, again) = codec
        .decode_with_report("Order", r#"{"id":1,"customer":7}"#)
        .unwrap();
    assert!(again.created.is_empty());
    assert!(again.promoted.is_empty());
}

// ── Merge policy ─────────────────────────────────────────────────

#[test]
fn local_edit_wins_over_incoming_value() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A-1","total":10}"#);
    order.set("total", 99).unwrap();

    let (_, report) = codec
        .decode_with_report("Order", r#"{"id":1,"number":"A-2","total":10}"#)
        .unwrap();

    assert_eq!(order.get("total"), Some(json!(99)));
    assert_eq!(order.get("number"), Some(json!("A-2")));
    assert_eq!(order.status(), LifecycleStatus::Edit);
    assert!(order.is_dirty("total"));
    assert_eq!(
        report.conflicts,
        vec![Conflict {
            type_name: "Order".into(),
            key: Some(EntityKey::Int(1)),
            property: "total".into(),
        }]
    );
}

#[test]
fn suspended_instance_is_refreshed() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A"}"#);
    assert!(order.suspend());

    decode(&codec, "Order", r#"{"id":1,"number":"B"}"#);
    assert_eq!(order.status(), LifecycleStatus::Actual);
    assert_eq!(order.get("number"), Some(json!("B")));
}

#[test]
fn header_only_payload_leaves_instance_untouched() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A"}"#);
    order.suspend();

    decode(&codec, "Order", r#"{"id":1}"#);
    assert_eq!(order.status(), LifecycleStatus::Suspend);
    assert_eq!(order.get("number"), Some(json!("A")));
}

#[test]
fn read_only_property_is_loaded() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"created":"2026-01-01"}"#);
    assert_eq!(order.get("created"), Some(json!("2026-01-01")));
}

#[test]
fn unknown_properties_are_skipped() {
    let (codec, _registry) = make_codec();
    let order = decode(
        &codec,
        "Order",
        r#"{"mystery":[1,{"a":2}],"id":1,"other":{"deep":[null]},"number":"X"}"#,
    );
    assert_eq!(order.get("number"), Some(json!("X")));
}

// ── Subtype dispatch ─────────────────────────────────────────────

#[test]
fn discriminator_selects_subtype() {
    let (codec, registry) = make_codec();
    let shape = decode(&codec, "Shape", r#"{"kind":1,"id":5,"label":"c","radius":2.5}"#);

    assert_eq!(shape.type_name(), "Circle");
    assert_eq!(shape.get("radius"), Some(json!(2.5)));
    assert_eq!(shape.get("label"), Some(json!("c")));
    // Subtypes share the hierarchy's identity map.
    assert!(Arc::ptr_eq(&cached(&registry, "Square", 5).unwrap(), &shape));
}

#[test]
fn string_discriminator_is_accepted() {
    let (codec, _registry) = make_codec();
    let shape = decode(&codec, "Shape", r#"{"kind":"2","id":6,"side":3}"#);
    assert_eq!(shape.type_name(), "Square");
    assert_eq!(shape.get("side"), Some(json!(3)));
}

#[test]
fn unknown_discriminator_keeps_static_type() {
    let (codec, _registry) = make_codec();
    let shape = decode(&codec, "Shape", r#"{"kind":9,"id":7,"label":"x","radius":1}"#);

    assert_eq!(shape.type_name(), "Shape");
    assert_eq!(shape.get("label"), Some(json!("x")));
    assert_eq!(shape.get("radius"), None);
}

#[test]
fn polymorphic_collection_members_dispatch() {
    let (codec, _registry) = make_codec();
    let drawing = decode(
        &codec,
        "Drawing",
        r#"{"id":1,"shapes":[{"kind":1,"id":10,"radius":1},{"kind":2,"id":11,"side":2}]}"#,
    );
    let shapes = drawing.collection("shapes").unwrap();
    let names: Vec<String> = shapes
        .items()
        .iter()
        .map(|shape| shape.type_name().to_string())
        .collect();
    assert_eq!(names, vec!["Circle", "Square"]);
}

#[test]
fn scalar_stub_is_narrowed_by_discriminated_payload() {
    let (codec, registry) = make_codec();
    let drawing = decode(&codec, "Drawing", r#"{"id":1,"shapes":[5]}"#);
    let stub = cached(&registry, "Shape", 5).unwrap();
    assert_eq!(stub.type_name(), "Shape");

    let shape = decode(&codec, "Shape", r#"{"kind":1,"id":5,"label":"c","radius":3}"#);
    assert!(Arc::ptr_eq(&shape, &stub));
    assert_eq!(shape.type_name(), "Circle");
    assert_eq!(shape.get("kind"), Some(json!(1)));
    assert_eq!(shape.get("radius"), Some(json!(3)));
    assert_eq!(shape.get("label"), Some(json!("c")));
    assert!(Arc::ptr_eq(&drawing.collection("shapes").unwrap().items()[0], &shape));
}

#[test]
fn subtype_entry_point_narrows_cached_base_instance() {
    let (codec, registry) = make_codec();
    decode(&codec, "Drawing", r#"{"id":1,"shapes":[6]}"#);

    let shape = decode(&codec, "Circle", r#"{"id":6,"radius":4}"#);
    assert!(Arc::ptr_eq(&shape, &cached(&registry, "Shape", 6).unwrap()));
    assert_eq!(shape.type_name(), "Circle");
    assert_eq!(shape.get("radius"), Some(json!(4)));

    // A base-typed payload leaves the narrowed type in place.
    let again = decode(&codec, "Shape", r#"{"id":6,"radius":5}"#);
    assert!(Arc::ptr_eq(&again, &shape));
    assert_eq!(again.type_name(), "Circle");
    assert_eq!(again.get("radius"), Some(json!(5)));
}

#[test]
fn sibling_subtype_payload_keeps_cached_type() {
    let (codec, _registry) = make_codec();
    let square = decode(&codec, "Shape", r#"{"kind":2,"id":7,"side":1}"#);
    let shape = decode(&codec, "Shape", r#"{"kind":1,"id":7,"radius":2,"side":3}"#);

    assert!(Arc::ptr_eq(&shape, &square));
    assert_eq!(shape.type_name(), "Square");
    assert_eq!(shape.get("side"), Some(json!(3)));
}

// ── Nested references ────────────────────────────────────────────

#[test]
fn nested_object_reference_is_resolved() {
    let (codec, registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"customer":{"id":7,"name":"Ann"}}"#);

    let customer = order.reference("customer").unwrap();
    assert_eq!(customer.get("name"), Some(json!("Ann")));
    assert!(Arc::ptr_eq(&cached(&registry, "Customer", 7).unwrap(), &customer));
}

#[test]
fn scalar_reference_resolves_stub_filled_later() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"customer":7}"#);
    let stub = order.reference("customer").unwrap();
    assert_eq!(stub.key(), Some(EntityKey::Int(7)));
    assert_eq!(stub.status(), LifecycleStatus::Actual);

    let customer = decode(&codec, "Customer", r#"{"id":7,"name":"Ann"}"#);
    assert!(Arc::ptr_eq(&stub, &customer));
    assert_eq!(stub.get("name"), Some(json!("Ann")));
}

#[test]
fn null_reference_clears_slot() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"customer":7}"#);
    decode(&codec, "Order", r#"{"id":1,"customer":null}"#);
    assert!(order.reference("customer").is_none());
}

#[test]
fn cyclic_payload_resolves_to_same_instances() {
    let (codec, _registry) = make_codec();
    let boss = decode(
        &codec,
        "Employee",
        r#"{"id":1,"reports":[{"id":2,"manager":{"id":1,"name":"Boss"}}]}"#,
    );
    let report = boss.collection("reports").unwrap().items()[0].clone();
    assert!(Arc::ptr_eq(&report.reference("manager").unwrap(), &boss));
    assert_eq!(boss.get("name"), Some(json!("Boss")));
}

#[test]
fn first_load_fills_collection() {
    let (codec, _registry) = make_codec();
    let (order, report) = codec
        .decode_with_report("Order", r#"{"id":1,"lines":[{"id":10,"product":"x"},{"id":11}]}"#)
        .unwrap();
    let lines = order.unwrap().collection("lines").unwrap();

    assert_eq!(member_ids(&lines), vec![10, 11]);
    assert_eq!(report.reconciled.added, 2);
}

#[test]
fn null_collection_empties_members() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"lines":[{"id":10}]}"#);
    decode(&codec, "Order", r#"{"id":1,"lines":null}"#);
    assert!(order.collection("lines").unwrap().is_empty());
}

// ── Lists and readers ────────────────────────────────────────────

#[test]
fn decode_list_drops_null_members() {
    let (codec, _registry) = make_codec();
    let orders = codec
        .decode_list("Order", r#"[{"id":1},null,{"id":2,"number":"B"}]"#)
        .unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].get("number"), Some(json!("B")));
}

#[test]
fn decode_list_shares_instances_across_elements() {
    let (codec, _registry) = make_codec();
    let orders = codec
        .decode_list("Order", r#"[{"id":1,"customer":7},{"id":2,"customer":{"id":7}}]"#)
        .unwrap();
    let a = orders[0].reference("customer").unwrap();
    let b = orders[1].reference("customer").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn decode_reader_streams_payload() {
    let (codec, _registry) = make_codec();
    let body = br#"{"id":3,"number":"C"}"#;
    let order = codec.decode_reader("Order", &body[..]).unwrap().unwrap();
    assert_eq!(order.get("number"), Some(json!("C")));
}

// ── Known targets ────────────────────────────────────────────────

#[test]
fn decode_into_accepts_payload_before_identity() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A"}"#);
    codec
        .decode_into(&order, r#"{"number":"B","id":1}"#)
        .unwrap();
    assert_eq!(order.get("number"), Some(json!("B")));
}

#[test]
fn decode_into_rejects_different_key() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1}"#);
    let err = codec.decode_into(&order, r#"{"id":2}"#).unwrap_err();
    assert!(matches!(err, CodecError::Model(ModelError::KeyAlreadyAssigned(_))));
}

#[test]
fn new_owner_takes_incoming_collection() {
    let (codec, registry) = make_codec();
    let order = registry.create("Order").unwrap();
    codec
        .decode_into(&order, r#"{"id":3,"lines":[{"id":11},{"id":12}]}"#)
        .unwrap();

    assert_eq!(member_ids(&order.collection("lines").unwrap()), vec![11, 12]);
    assert_eq!(order.status(), LifecycleStatus::New);
}

#[test]
fn apply_saved_accepts_and_maps_new_instance() {
    let (codec, registry) = make_codec();
    let order = registry.create("Order").unwrap();
    order.set("number", "N-1").unwrap();

    codec
        .apply_saved(&order, r#"{"id":42,"number":"N-1","created":"2026-01-01"}"#)
        .unwrap();

    assert_eq!(order.status(), LifecycleStatus::Actual);
    assert_eq!(order.key(), Some(EntityKey::Int(42)));
    assert!(order.dirty_properties().is_empty());
    assert_eq!(order.get("created"), Some(json!("2026-01-01")));
    assert!(Arc::ptr_eq(&cached(&registry, "Order", 42).unwrap(), &order));
}

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn property_before_identity_fails() {
    let (codec, registry) = make_codec();
    let err = codec
        .decode("Order", r#"{"number":"A","id":1}"#)
        .unwrap_err();

    match err {
        CodecError::IdentityNotResolved { type_name, property } => {
            assert_eq!(type_name, "Order");
            assert_eq!(property, "number");
        }
        other => panic!("expected IdentityNotResolved, got {other:?}"),
    }
    assert!(cached(&registry, "Order", 1).is_none());
}

#[test]
fn object_without_identity_fails() {
    let (codec, _registry) = make_codec();
    for json in [r#"{}"#, r#"{"mystery":1}"#] {
        let err = codec.decode("Order", json).unwrap_err();
        assert!(matches!(err, CodecError::MissingIdentity { .. }), "{json}");
    }
}

#[test]
fn malformed_key_fails() {
    let (codec, _registry) = make_codec();
    let err = codec.decode("Order", r#"{"id":"abc"}"#).unwrap_err();
    match err {
        CodecError::InvalidKey { type_name, value } => {
            assert_eq!(type_name, "Order");
            assert_eq!(value, r#""abc""#);
        }
        other => panic!("expected InvalidKey, got {other:?}"),
    }
}

#[test]
fn nested_error_surfaces_typed() {
    let (codec, _registry) = make_codec();
    let err = codec
        .decode("Order", r#"{"id":1,"customer":{"name":"Ann"}}"#)
        .unwrap_err();
    assert!(matches!(
        err,
        CodecError::IdentityNotResolved { ref type_name, .. } if type_name == "Customer"
    ));
}

#[test]
fn truncated_stream_releases_staged_instance() {
    let (codec, registry) = make_codec();
    let err = codec
        .decode("Order", r#"{"id":1,"number":"x""#)
        .unwrap_err();

    assert!(matches!(err, CodecError::Json(_)));
    assert_eq!(staged(&registry, "Order"), 0);
    assert!(cached(&registry, "Order", 1).is_none());
}

#[test]
fn trailing_content_is_rejected() {
    let (codec, _registry) = make_codec();
    let err = codec.decode("Order", r#"{"id":1} {"id":2}"#).unwrap_err();
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn top_level_scalar_is_rejected() {
    let (codec, _registry) = make_codec();
    let err = codec.decode("Order", "1").unwrap_err();
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn unknown_type_fails() {
    let (codec, _registry) = make_codec();
    let err = codec.decode("Invoice", r#"{"id":1}"#).unwrap_err();
    assert!(matches!(err, CodecError::UnknownType(name) if name == "Invoice"));
}

#[test]
fn failed_refresh_rolls_back_and_leaves_load() {
    let (codec, _registry) = make_codec();
    let customer = decode(&codec, "Customer", r#"{"id":1,"name":"a","orders":[{"id":10}]}"#);
    let orders = customer.collection("orders").unwrap();

    let err = codec
        .decode(
            "Customer",
            r#"{"id":1,"name":"partial","orders":[{"id":11},{"number":"x"}]}"#,
        )
        .unwrap_err();
    assert!(matches!(err, CodecError::IdentityNotResolved { .. }));
    assert_eq!(customer.status(), LifecycleStatus::Actual);
    assert_eq!(customer.get("name"), Some(json!("a")));
    assert_eq!(member_ids(&orders), vec![10]);

    decode(&codec, "Customer", r#"{"id":1,"name":"b","orders":[{"id":12}]}"#);
    assert_eq!(customer.status(), LifecycleStatus::Actual);
    assert_eq!(customer.get("name"), Some(json!("b")));
    assert_eq!(member_ids(&orders), vec![12]);
}

#[test]
fn failed_refresh_of_suspended_instance_stays_suspended() {
    let (codec, _registry) = make_codec();
    let order = decode(&codec, "Order", r#"{"id":1,"number":"A"}"#);
    order.suspend();

    assert!(codec
        .decode("Order", r#"{"id":1,"number":"B","total":"#)
        .is_err());
    assert_eq!(order.status(), LifecycleStatus::Suspend);
    assert_eq!(order.get("number"), Some(json!("A")));
}
