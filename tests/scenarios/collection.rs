//! Collection Scenarios
//!
//! Collector behavior seen from application tasks:
//! - Reachability from bindings decides what survives
//! - Application tasks keep running while passes do
//! - The background runner reclaims garbage on its own

use crate::common::*;
use emberdb::Color;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn build_tree(db: &Database, name: &str, depth: u32) -> EntityId {
    fn node(depth: u32) -> EntityCell {
        if depth == 0 {
            return EntityCell::new(Value::Int(0));
        }
        let left = node(depth - 1);
        let right = node(depth - 1);
        EntityCell::new(Value::map([
            ("left", reference(&left)),
            ("right", reference(&right)),
        ]))
    }
    let root = node(depth);
    db.execute(|ctx| ctx.bind(name, &root)).unwrap()
}

// ============================================================================
// Reachability
// ============================================================================

#[test]
fn test_unbinding_tree_reclaims_whole_tree() {
    let db = open_db_with_batch(5);
    build_tree(&db, "keep", 3);
    build_tree(&db, "drop", 3);
    assert_eq!(entity_count(&db), 30);

    db.execute(|ctx| ctx.unbind("drop")).unwrap();
    let report = collect(&db);

    assert_eq!(report.nodes_marked, 15);
    assert_eq!(report.nodes_swept, 15);
    assert!(!report.sweep_skipped);
    assert_eq!(entity_count(&db), 15);
}

#[test]
fn test_survivors_end_black() {
    let db = open_db_with_batch(4);
    let root = build_tree(&db, "root", 2);
    collect(&db);

    let colors = db
        .execute(|ctx| {
            let graph = ctx.graph();
            let mut colors = Vec::new();
            for id in graph.all_nodes() {
                colors.push(graph.get_color(id?)?);
            }
            Ok(colors)
        })
        .unwrap();
    assert_eq!(colors.len(), 7);
    assert!(colors.iter().all(|c| *c == Color::Black));
    assert!(entity_exists(&db, root));
}

#[test]
fn test_empty_database_pass() {
    let db = open_db();
    let report = collect(&db);
    assert_eq!(report, CollectionReport { elapsed: report.elapsed, ..Default::default() });
}

#[test]
fn test_deleted_entity_reference_does_not_break_mark() {
    let db = open_db();
    let target = bind_value(&db, "target", Value::Int(1));
    db.execute(|ctx| {
        let holder = EntityCell::new(Value::Ref(EntityRef::id(target)));
        ctx.bind("holder", &holder)?;
        Ok(())
    })
    .unwrap();
    db.execute(|ctx| {
        ctx.unbind("target")?;
        ctx.entity_store().delete(target)
    })
    .unwrap();

    let report = collect(&db);
    assert_eq!(report.nodes_marked, 1);
    assert_eq!(report.nodes_swept, 0);
}

// ============================================================================
// Concurrent Mutators
// ============================================================================

#[test]
fn test_mutators_keep_committing_during_passes() {
    let db = open_db_with_batch(2);
    bind_value(&db, "counter", Value::Int(0));
    build_tree(&db, "tree", 4);

    let stop = Arc::new(AtomicBool::new(false));
    let started = Arc::new(Barrier::new(2));
    let collector = {
        let db = db.clone();
        let stop = Arc::clone(&stop);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            started.wait();
            let mut passes = 0;
            while !stop.load(Ordering::SeqCst) {
                collect(&db);
                passes += 1;
            }
            passes
        })
    };

    started.wait();
    let retry = RetryConfig::new().with_max_retries(1_000).with_backoff(1, 4);
    for _ in 0..50 {
        db.execute_with_retry(&retry, |ctx| {
            let counter = ctx.lookup("counter")?.unwrap();
            counter.update(|v| *v = Value::Int(v.as_int().unwrap_or(0) + 1));
            Ok(())
        })
        .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    collector.join().unwrap();

    assert_eq!(bound_value(&db, "counter"), Some(Value::Int(50)));
    let report = collect(&db);
    assert_eq!(report.nodes_swept, 0);
    assert_eq!(entity_count(&db), 32);
}

#[test]
fn test_moving_subtree_during_passes_keeps_it() {
    let db = open_db_with_batch(1);
    build_tree(&db, "a", 2);
    let stop = Arc::new(AtomicBool::new(false));

    let collector = {
        let db = db.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                collect(&db);
            }
        })
    };

    // hop the tree between two names, never leaving it unbound at commit
    let retry = RetryConfig::new().with_max_retries(1_000).with_backoff(1, 4);
    for i in 0..20 {
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        db.execute_with_retry(&retry, |ctx| {
            let id = ctx.unbind(from)?.unwrap();
            ctx.bindings().update(to, id)
        })
        .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    collector.join().unwrap();

    collect(&db);
    assert_eq!(entity_count(&db), 7);
}

// ============================================================================
// Background Runner
// ============================================================================

#[test]
fn test_background_runner_reclaims_garbage() {
    init_tracing();
    let mut config = EmberConfig::default();
    config.gc.interval_ms = Some(5);
    let db = Database::open(config).unwrap();

    build_tree(&db, "keep", 2);
    let garbage = build_tree(&db, "drop", 2);
    db.execute(|ctx| ctx.unbind("drop")).unwrap();

    let runner = db.spawn_gc_runner().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while entity_exists(&db, garbage) {
        assert!(Instant::now() < deadline, "garbage never collected");
        thread::sleep(Duration::from_millis(5));
    }
    runner.shutdown();

    assert!(runner.is_shutdown());
    assert_eq!(entity_count(&db), 7);
}

#[test]
fn test_runner_requires_interval() {
    let db = open_db();
    assert!(matches!(db.spawn_gc_runner(), Err(Error::Config(_))));
}
