use entcache_model::{CollectionChange, Entity, EntityRef, PropertyDescriptor, TypeDescriptor};
use entcache_types::{EntityKey, KeyKind, LifecycleStatus};
use parking_lot::Mutex;
use std::sync::Arc;

fn make_descriptors() -> (Arc<TypeDescriptor>, Arc<TypeDescriptor>) {
    let order = TypeDescriptor::builder("Order")
        .property(PropertyDescriptor::identity("id", KeyKind::Int))
        .property(PropertyDescriptor::collection("lines", "Line").inverse("order"))
        .build()
        .unwrap();
    let line = TypeDescriptor::builder("Line")
        .property(PropertyDescriptor::identity("id", KeyKind::Int))
        .property(PropertyDescriptor::reference("order", "Order"))
        .build()
        .unwrap();
    (Arc::new(order), Arc::new(line))
}

fn make_line(line: &Arc<TypeDescriptor>, id: i64) -> EntityRef {
    Entity::blank(line.clone(), EntityKey::Int(id))
}

fn record_changes(entity: &EntityRef) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    entity.collection("lines").unwrap().subscribe(move |change| {
        let entry = match change {
            CollectionChange::Added(e) => format!("+{}", e.key().unwrap()),
            CollectionChange::Removed(e) => format!("-{}", e.key().unwrap()),
            CollectionChange::Reset => "reset".to_string(),
        };
        sink.lock().push(entry);
    });
    log
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn collection_knows_its_declaration() {
    let (order, _) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();

    assert_eq!(lines.name(), "lines");
    assert_eq!(lines.target_type(), "Line");
    assert_eq!(lines.inverse(), Some("order"));
    assert_eq!(lines.owner_status(), Some(LifecycleStatus::Actual));
}

// ── Local edits ──────────────────────────────────────────────────

#[test]
fn local_add_marks_owner_dirty() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();

    assert!(lines.add(make_line(&line, 10)));
    assert_eq!(o.status(), LifecycleStatus::Edit);
    assert!(o.is_dirty("lines"));
}

#[test]
fn duplicate_add_is_rejected() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();
    let l = make_line(&line, 10);

    assert!(lines.add(l.clone()));
    assert!(!lines.add(l));
    assert_eq!(lines.len(), 1);
}

#[test]
fn removing_absent_member_changes_nothing() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();

    assert!(!lines.remove(&make_line(&line, 99)));
    assert_eq!(o.status(), LifecycleStatus::Actual);
}

// ── Incoming edits ───────────────────────────────────────────────

#[test]
fn incoming_changes_do_not_touch_ledger() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();
    let l = make_line(&line, 10);

    assert!(lines.insert_incoming(l.clone()));
    assert!(!lines.insert_incoming(l.clone()));
    assert!(lines.remove_incoming(&l));
    assert!(!lines.remove_incoming(&l));
    assert_eq!(o.status(), LifecycleStatus::Actual);
    assert!(!o.is_dirty("lines"));
}

#[test]
fn replace_keeps_container_identity() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let before = o.collection("lines").unwrap();

    before.replace_incoming(vec![make_line(&line, 1), make_line(&line, 2)]);
    let after = o.collection("lines").unwrap();

    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.len(), 2);
}

// ── Listeners ────────────────────────────────────────────────────

#[test]
fn listeners_see_adds_removes_and_resets() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let log = record_changes(&o);
    let lines = o.collection("lines").unwrap();
    let l = make_line(&line, 5);

    lines.insert_incoming(l.clone());
    lines.remove_incoming(&l);
    lines.replace_incoming(vec![]);

    assert_eq!(*log.lock(), vec!["+5", "-5", "reset"]);
}

#[test]
fn unsubscribe_stops_notifications() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();
    let hits = Arc::new(Mutex::new(0));
    let sink = hits.clone();
    let id = lines.subscribe(move |_| *sink.lock() += 1);

    lines.insert_incoming(make_line(&line, 1));
    assert!(lines.unsubscribe(id));
    assert!(!lines.unsubscribe(id));
    lines.insert_incoming(make_line(&line, 2));

    assert_eq!(*hits.lock(), 1);
}

#[test]
fn listener_may_read_the_collection() {
    let (order, line) = make_descriptors();
    let o = Entity::blank(order, EntityKey::Int(1));
    let lines = o.collection("lines").unwrap();
    let seen = Arc::new(Mutex::new(0));
    let sink = seen.clone();
    let weak = Arc::downgrade(&lines);
    lines.subscribe(move |_| {
        if let Some(lines) = weak.upgrade() {
            *sink.lock() = lines.len();
        }
    });

    lines.insert_incoming(make_line(&line, 1));
    assert_eq!(*seen.lock(), 1);
}
