use std::sync::{Arc, Mutex};

use cairndb::catalog::DataType;
use cairndb::executor::{TriggerAction, TriggerHandler, TriggerTiming};
use cairndb::storage::Value;
use cairndb::{DatabaseConfig, Error, ExecutionEngine};
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, TriggerAction, TriggerTiming)>>,
}

impl Recorder {
    fn count(&self, action: TriggerAction, timing: TriggerTiming) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a, t)| *a == action && *t == timing)
            .count()
    }
}

impl TriggerHandler for Recorder {
    fn notify(&self, table: &str, action: TriggerAction, timing: TriggerTiming) {
        self.calls.lock().unwrap().push((table.to_string(), action, timing));
    }
}

fn setup() -> (TempDir, ExecutionEngine, Arc<Recorder>) {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut engine = ExecutionEngine::open(DatabaseConfig::new("trig").data_root(dir.path()))
        .unwrap()
        .with_trigger_handler(recorder.clone());
    engine
        .create_table("orders", &["id", "item"], &[DataType::Int, DataType::Str], Some("id"))
        .unwrap();
    (dir, engine, recorder)
}

#[test]
fn test_two_after_insert_triggers_fire_twice() {
    let (_dir, mut engine, recorder) = setup();
    engine.create_trigger("audit", "orders", "insert", "after").unwrap();
    engine.create_trigger("notify", "orders", "insert", "after").unwrap();

    engine
        .insert("orders", vec![Value::Int(1), Value::from("pen")])
        .unwrap();
    assert_eq!(recorder.count(TriggerAction::Insert, TriggerTiming::After), 2);

    // Schema violation: no after-trigger
    assert!(matches!(
        engine.insert("orders", vec![Value::Int(2)]),
        Err(Error::SchemaViolation(_))
    ));
    assert_eq!(recorder.count(TriggerAction::Insert, TriggerTiming::After), 2);
}

#[test]
fn test_before_triggers_fire_even_when_operation_fails() {
    let (_dir, mut engine, recorder) = setup();
    engine.create_trigger("check", "orders", "insert", "before").unwrap();

    let _ = engine.insert("orders", vec![Value::from("not a number"), Value::from("x")]);
    assert_eq!(recorder.count(TriggerAction::Insert, TriggerTiming::Before), 1);
    assert_eq!(recorder.count(TriggerAction::Insert, TriggerTiming::After), 0);
}

#[test]
fn test_after_triggers_need_a_change() {
    let (_dir, mut engine, recorder) = setup();
    engine.create_trigger("on_update", "orders", "update", "after").unwrap();
    engine.create_trigger("on_delete", "orders", "delete", "after").unwrap();
    engine
        .insert("orders", vec![Value::Int(1), Value::from("pen")])
        .unwrap();

    engine.update("orders", "item", Value::from("ink"), "id==9").unwrap();
    engine.delete("orders", "id==9").unwrap();
    assert_eq!(recorder.count(TriggerAction::Update, TriggerTiming::After), 0);
    assert_eq!(recorder.count(TriggerAction::Delete, TriggerTiming::After), 0);

    engine.update("orders", "item", Value::from("ink"), "id==1").unwrap();
    engine.delete("orders", "id==1").unwrap();
    assert_eq!(recorder.count(TriggerAction::Update, TriggerTiming::After), 1);
    assert_eq!(recorder.count(TriggerAction::Delete, TriggerTiming::After), 1);
}

#[test]
fn test_trigger_administration() {
    let (_dir, mut engine, recorder) = setup();

    assert!(matches!(
        engine.create_trigger("t", "orders", "upsert", "after"),
        Err(Error::InvalidTrigger(_))
    ));
    assert!(matches!(
        engine.create_trigger("t", "missing", "insert", "after"),
        Err(Error::InvalidTrigger(_))
    ));
    assert!(matches!(
        engine.create_trigger("t", "triggers", "insert", "after"),
        Err(Error::InvalidTrigger(_))
    ));

    engine.create_trigger("t", "orders", "insert", "after").unwrap();
    assert!(matches!(
        engine.create_trigger("t", "orders", "delete", "after"),
        Err(Error::PrimaryKeyViolation { .. })
    ));
    assert_eq!(engine.length("triggers").unwrap(), 1);

    engine.drop_trigger("t").unwrap();
    assert!(matches!(engine.drop_trigger("t"), Err(Error::InvalidTrigger(_))));

    engine
        .insert("orders", vec![Value::Int(1), Value::from("pen")])
        .unwrap();
    assert_eq!(recorder.count(TriggerAction::Insert, TriggerTiming::After), 0);
}
