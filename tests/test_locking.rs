use std::sync::{Arc, Mutex};

use cairndb::catalog::DataType;
use cairndb::executor::{TriggerAction, TriggerHandler, TriggerTiming};
use cairndb::storage::Value;
use cairndb::{DatabaseConfig, Error, ExecutionEngine, SelectQuery};
use tempfile::TempDir;

/// Two engines on one directory with different lock owners
fn two_processes() -> (TempDir, ExecutionEngine, ExecutionEngine) {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new("shared").data_root(dir.path());
    let mut a = ExecutionEngine::open(config.clone().process_id(1001)).unwrap();
    let b = ExecutionEngine::open(config.process_id(1002)).unwrap();

    a.create_table("accounts", &["id", "balance"], &[DataType::Int, DataType::Int], Some("id"))
        .unwrap();
    a.insert("accounts", vec![Value::Int(1), Value::Int(100)]).unwrap();
    (dir, a, b)
}

#[test]
fn test_lock_excludes_other_process() {
    let (_dir, mut a, mut b) = two_processes();

    assert!(a.lock_table("accounts").unwrap());
    assert!(matches!(
        b.lock_table("accounts"),
        Err(Error::TableLocked { holder: 1001, .. })
    ));

    a.unlock_table("accounts", false).unwrap();
    assert!(b.lock_table("accounts").unwrap());
    assert!(a.is_locked("accounts").unwrap());
}

#[test]
fn test_locked_table_rejects_writes_and_reads() {
    let (_dir, mut a, mut b) = two_processes();
    a.lock_table("accounts").unwrap();

    assert!(matches!(
        b.insert("accounts", vec![Value::Int(2), Value::Int(5)]),
        Err(Error::TableLocked { .. })
    ));
    assert!(matches!(
        b.update("accounts", "balance", Value::Int(0), "id==1"),
        Err(Error::TableLocked { .. })
    ));
    assert!(matches!(
        b.delete("accounts", "id==1"),
        Err(Error::TableLocked { .. })
    ));
    assert!(matches!(
        b.select(SelectQuery::new("*", "accounts")),
        Err(Error::TableLocked { .. })
    ));
    assert_eq!(b.length("accounts").unwrap(), 1);

    // The holder keeps working and keeps the lock
    a.insert("accounts", vec![Value::Int(2), Value::Int(5)]).unwrap();
    assert!(a.is_locked("accounts").unwrap());

    a.unlock_table("accounts", false).unwrap();
    assert_eq!(b.select(SelectQuery::new("*", "accounts")).unwrap().live_count(), 2);
}

#[test]
fn test_operator_releases_its_own_lock() {
    let (_dir, mut a, mut b) = two_processes();

    a.insert("accounts", vec![Value::Int(2), Value::Int(5)]).unwrap();
    assert!(!a.is_locked("accounts").unwrap());
    b.insert("accounts", vec![Value::Int(3), Value::Int(7)]).unwrap();
    assert_eq!(a.length("accounts").unwrap(), 3);
}

#[test]
fn test_release_by_non_owner() {
    let (_dir, mut a, mut b) = two_processes();
    a.lock_table("accounts").unwrap();

    assert!(matches!(
        b.unlock_table("accounts", false),
        Err(Error::NotOwner { holder: 1001, .. })
    ));
    assert!(a.is_locked("accounts").unwrap());

    b.unlock_table("accounts", true).unwrap();
    assert!(!a.is_locked("accounts").unwrap());
}

#[test]
fn test_metadata_tables_are_never_locked() {
    let (_dir, mut a, _b) = two_processes();
    assert!(!a.is_locked("meta_length").unwrap());
    assert!(!a.lock_table("meta_insert_stack").unwrap());
}

/// Inserts a row through another engine while a before-trigger runs
struct InterleavedWriter {
    other: Mutex<ExecutionEngine>,
}

impl TriggerHandler for InterleavedWriter {
    fn notify(&self, table: &str, action: TriggerAction, timing: TriggerTiming) {
        if action == TriggerAction::Insert && timing == TriggerTiming::Before {
            let mut other = self.other.lock().unwrap();
            other.insert(table, vec![Value::Int(2), Value::Int(20)]).unwrap();
        }
    }
}

#[test]
fn test_commit_between_reload_and_lock_is_kept() {
    let (_dir, a, mut b) = two_processes();
    b.delete("accounts", "id==1").unwrap();
    assert_eq!(b.insert_stack("accounts").unwrap(), vec![0]);

    let mut a = a.with_trigger_handler(Arc::new(InterleavedWriter { other: Mutex::new(b) }));
    a.create_trigger("interleave", "accounts", "insert", "before").unwrap();

    // B refills slot 0 inside A's before-trigger; A must see that and append
    assert_eq!(a.insert("accounts", vec![Value::Int(1), Value::Int(10)]).unwrap(), 1);

    let table = a.table("accounts").unwrap();
    let rows: Vec<(usize, Vec<Value>)> = table
        .live_rows()
        .map(|(pos, row)| (pos, row.values().to_vec()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (0, vec![Value::Int(2), Value::Int(20)]),
            (1, vec![Value::Int(1), Value::Int(10)]),
        ]
    );
    assert_eq!(a.length("accounts").unwrap(), 2);
    assert!(a.insert_stack("accounts").unwrap().is_empty());
}
