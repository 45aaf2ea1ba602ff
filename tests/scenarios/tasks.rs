//! Task Execution Tests
//!
//! Raw table access through `TaskContext`, and what other tasks see of it:
//! - Commit publishes, failure and rollback-only discard
//! - Snapshots are stable while other tasks commit
//! - Only write-write conflicts abort

use crate::common::*;

fn blob(s: &str) -> Blob {
    Blob::from(s)
}

fn read(db: &Database, table: &str, key: &str) -> Blob {
    db.execute(|ctx| ctx.table(table).read(&blob(key)))
        .unwrap()
}

// ============================================================================
// Commit and Rollback
// ============================================================================

#[test]
fn test_committed_writes_visible_to_later_tasks() {
    let db = open_db();
    db.execute(|ctx| {
        let table = ctx.table("settings");
        table.write(blob("theme"), blob("dark"))?;
        table.write(blob("lang"), blob("en"))
    })
    .unwrap();

    assert_eq!(read(&db, "settings", "theme"), blob("dark"));
    assert_eq!(read(&db, "settings", "lang"), blob("en"));
    assert!(read(&db, "other", "theme").is_empty());
}

#[test]
fn test_failed_task_leaves_no_trace() {
    let db = open_db();
    let err = db
        .execute(|ctx| {
            ctx.table("t").write(blob("k"), blob("v"))?;
            Err::<(), _>(Error::IllegalArgument("task gave up".to_string()))
        })
        .unwrap_err();

    assert!(matches!(err, Error::IllegalArgument(_)));
    assert!(read(&db, "t", "k").is_empty());
}

#[test]
fn test_rollback_only_task_is_not_committed() {
    let db = open_db();
    let err = db
        .execute(|ctx| {
            ctx.table("t").write(blob("k"), blob("v"))?;
            ctx.set_rollback_only();
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::PrepareFailed { .. }));
    assert!(!err.is_retryable());
    assert!(read(&db, "t", "k").is_empty());
}

#[test]
fn test_metrics_count_commits_and_aborts() {
    let db = open_db();
    db.execute(|ctx| ctx.table("t").write(blob("a"), blob("1")))
        .unwrap();
    let _ = db.execute(|_| Err::<(), _>(Error::IllegalState("boom".to_string())));

    let metrics = db.coordinator().metrics();
    assert_eq!(metrics.started, 2);
    assert_eq!(metrics.committed, 1);
    assert_eq!(metrics.aborted, 1);
    assert_eq!(metrics.in_flight, 0);
}

#[test]
fn test_deleted_key_disappears_from_scans() {
    let db = open_db();
    db.execute(|ctx| {
        let table = ctx.table("t");
        for key in ["a", "b", "c"] {
            table.write(blob(key), blob("x"))?;
        }
        Ok(())
    })
    .unwrap();
    db.execute(|ctx| ctx.table("t").delete(blob("b"))).unwrap();

    let keys = db
        .execute(|ctx| {
            let table = ctx.table("t");
            let mut keys = Vec::new();
            let mut cursor = table.first_key()?;
            while let Some(key) = cursor {
                cursor = table.next_key_after(&key)?;
                keys.push(key);
            }
            Ok(keys)
        })
        .unwrap();
    assert_eq!(keys, vec![blob("a"), blob("c")]);
}

// ============================================================================
// Isolation
// ============================================================================

#[test]
fn test_snapshot_stable_while_other_task_commits() {
    let db = open_db();
    db.execute(|ctx| ctx.table("t").write(blob("k"), blob("old")))
        .unwrap();

    let (before, after) = db
        .execute(|ctx| {
            let before = ctx.table("t").read(&blob("k"))?;
            db.execute(|other| other.table("t").write(blob("k"), blob("new")))?;
            let after = ctx.table("t").read(&blob("k"))?;
            Ok((before, after))
        })
        .unwrap();

    assert_eq!(before, blob("old"));
    assert_eq!(after, blob("old"));
    assert_eq!(read(&db, "t", "k"), blob("new"));
}

#[test]
fn test_first_committer_wins() {
    let db = open_db();
    let err = db
        .execute(|ctx| {
            ctx.table("t").write(blob("k"), blob("outer"))?;
            db.execute(|other| other.table("t").write(blob("k"), blob("inner")))?;
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(err.is_retryable());
    assert_eq!(read(&db, "t", "k"), blob("inner"));
}

#[test]
fn test_write_skew_commits_both() {
    let db = open_db();
    db.execute(|ctx| {
        let table = ctx.table("oncall");
        table.write(blob("alice"), blob("on"))?;
        table.write(blob("bob"), blob("on"))
    })
    .unwrap();

    // each task checks the other is on call, then leaves
    db.execute(|ctx| {
        let table = ctx.table("oncall");
        assert_eq!(table.read(&blob("bob"))?, blob("on"));
        db.execute(|other| {
            let table = other.table("oncall");
            assert_eq!(table.read(&blob("alice"))?, blob("on"));
            table.write(blob("bob"), blob("off"))
        })?;
        table.write(blob("alice"), blob("off"))
    })
    .unwrap();

    assert_eq!(read(&db, "oncall", "alice"), blob("off"));
    assert_eq!(read(&db, "oncall", "bob"), blob("off"));
}

#[test]
fn test_retry_resolves_conflict() {
    let db = open_db();
    let mut attempts = 0;
    db.execute_with_retry(&RetryConfig::new().with_max_retries(3), |ctx| {
        attempts += 1;
        ctx.table("t").write(blob("k"), blob("mine"))?;
        if attempts == 1 {
            db.execute(|other| other.table("t").write(blob("k"), blob("theirs")))?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(read(&db, "t", "k"), blob("mine"));
}
