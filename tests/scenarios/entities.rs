//! Entity and Binding Scenarios
//!
//! Object graphs built in one task and navigated in another.

use crate::common::*;
use emberdb::{MessagePackCodec, ObjectCodec, SerializationListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Bindings
// ============================================================================

#[test]
fn test_bindings_listed_in_name_order() {
    let db = open_db();
    for name in ["zeta", "alpha", "mid"] {
        bind_value(&db, name, Value::from(name));
    }

    let names = db
        .execute(|ctx| {
            let bindings = ctx.bindings();
            let mut names = Vec::new();
            let mut cursor = bindings.first_key()?;
            while let Some(name) = cursor {
                cursor = bindings.next_key_after(&name)?;
                names.push(name);
            }
            Ok(names)
        })
        .unwrap();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn test_unbind_returns_previous_target() {
    let db = open_db();
    let id = bind_value(&db, "root", Value::Int(7));

    assert_eq!(db.execute(|ctx| ctx.unbind("root")).unwrap(), Some(id));
    assert_eq!(db.execute(|ctx| ctx.unbind("root")).unwrap(), None);
    assert!(bound_value(&db, "root").is_none());
    // unbinding does not delete the entity
    assert!(entity_exists(&db, id));
}

#[test]
fn test_binding_same_cell_twice_shares_one_entity() {
    let db = open_db();
    let cell = EntityCell::new(Value::from("shared"));
    let (a, b) = db
        .execute(|ctx| Ok((ctx.bind("a", &cell)?, ctx.bind("b", &cell)?)))
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(entity_count(&db), 1);
}

// ============================================================================
// References
// ============================================================================

#[test]
fn test_reference_by_id_across_tasks() {
    let db = open_db();
    let target = bind_value(&db, "target", Value::from("payload"));

    db.execute(|ctx| {
        let pointer = EntityCell::new(Value::map([("to", Value::Ref(EntityRef::id(target)))]));
        ctx.bind("pointer", &pointer)?;
        Ok(())
    })
    .unwrap();

    let value = db
        .execute(|ctx| {
            let pointer = ctx.lookup("pointer")?.unwrap().get();
            let to = pointer.get("to").and_then(Value::as_ref_handle).unwrap();
            Ok(ctx.entities().dereference(to)?.get())
        })
        .unwrap();
    assert_eq!(value, Value::from("payload"));

    let edges = db
        .execute(|ctx| {
            let pointer = ctx.bindings().read("pointer")?.unwrap();
            ctx.entity_store().referenced_ids(pointer)
        })
        .unwrap();
    assert_eq!(edges.into_iter().collect::<Vec<_>>(), vec![target]);
}

#[test]
fn test_entity_ids_increase() {
    let db = open_db();
    let first = bind_value(&db, "a", Value::Null);
    let second = bind_value(&db, "b", Value::Null);

    assert!(second > first);
    assert_eq!(db.largest_entity_id(), second.as_u64());
}

#[test]
fn test_same_cell_resolves_to_same_id_within_task() {
    let db = open_db();
    let ids = db
        .execute(|ctx| {
            let cell = EntityCell::new(Value::Int(1));
            let first = ctx.entities().get_entity_id(&cell)?;
            let second = ctx.entities().get_entity_id(&cell)?;
            let by_id = ctx.entities().get_entity_by_id(first)?;
            assert!(by_id.ptr_eq(&cell));
            Ok((first, second))
        })
        .unwrap();
    assert_eq!(ids.0, ids.1);
}

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug, Default)]
struct CountingCodec {
    writes: AtomicUsize,
}

impl ObjectCodec for CountingCodec {
    fn serialize(
        &self,
        value: &Value,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> emberdb::Result<Blob> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        MessagePackCodec.serialize(value, listeners)
    }

    fn deserialize(
        &self,
        bytes: &Blob,
        listeners: &mut [&mut dyn SerializationListener],
    ) -> emberdb::Result<Value> {
        MessagePackCodec.deserialize(bytes, listeners)
    }
}

#[test]
fn test_custom_codec_writes_every_registered_entity() {
    init_tracing();
    let codec = Arc::new(CountingCodec::default());
    let db = Database::with_codec(EmberConfig::default(), codec.clone()).unwrap();

    let leaf = EntityCell::new(Value::Int(1));
    let root = EntityCell::new(Value::Array(vec![reference(&leaf), reference(&leaf)]));
    db.execute(|ctx| ctx.bind("root", &root)).unwrap();

    assert_eq!(codec.writes.load(Ordering::SeqCst), 2);
    assert_eq!(entity_count(&db), 2);
}
