//! Configuration Scenarios
//!
//! Config files on disk and their effect on an opened database.

use crate::common::*;
use emberdb::CONFIG_FILE_NAME;
use tempfile::TempDir;

#[test]
fn test_default_file_opens_database() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, EmberConfig::default_toml()).unwrap();

    let config = EmberConfig::load(&path).unwrap();
    assert_eq!(config, EmberConfig::default());
    let db = Database::open(config).unwrap();
    bind_value(&db, "root", Value::Int(1));
    assert_eq!(bound_value(&db, "root"), Some(Value::Int(1)));
}

#[test]
fn test_written_config_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);

    let mut config = EmberConfig::default();
    config.gc.batch_size = 3;
    config.gc.interval_ms = Some(250);
    config.transaction.randomize_participant_order = false;
    config.write_to_file(&path).unwrap();

    let loaded = EmberConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.gc.interval(), Some(std::time::Duration::from_millis(250)));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config = EmberConfig::from_toml_str("[gc]\nbatch_size = 2\n").unwrap();
    assert_eq!(config.gc.batch_size, 2);
    assert_eq!(config.gc.step_retries, EmberConfig::default().gc.step_retries);
    assert_eq!(config.retry, EmberConfig::default().retry);
}

#[test]
fn test_invalid_config_rejected_at_open() {
    let mut config = EmberConfig::default();
    config.gc.batch_size = 0;
    assert!(matches!(Database::open(config), Err(Error::Config(_))));

    let err = EmberConfig::from_toml_str("[retry]\nbase_delay_ms = 100\nmax_delay_ms = 10\n")
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    match EmberConfig::load(&path) {
        Err(Error::Config(msg)) => assert!(msg.contains("absent.toml")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_batch_size_applies_to_collector() {
    let mut config = EmberConfig::default();
    config.gc.batch_size = 1;
    let db = Database::open(config).unwrap();
    assert_eq!(db.config().gc.batch_size, 1);

    let leaf = EntityCell::new(Value::Int(1));
    let root = EntityCell::new(reference(&leaf));
    db.execute(|ctx| ctx.bind("root", &root)).unwrap();
    register(&db, &EntityCell::new(Value::Null));

    let report = collect(&db);
    assert_eq!(report.nodes_marked, 2);
    assert_eq!(report.nodes_swept, 1);
}
