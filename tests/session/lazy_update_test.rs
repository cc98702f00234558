//! Integration tests for lazy loading and column-precise dirty checking.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::{KeyValue, SqliteConnection, Value};
use relata::metamodel::{Attribute, EntityBuilder, Metamodel, ValueType};
use relata::session::{AccessError, SessionError};
use relata::SessionFactory;

use common::{hr_factory, recorded, scalar, writes};

#[test]
fn test_lazy_attribute_loads_on_demand() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 1).unwrap().unwrap();
    assert!(!employee.is_loaded("notes").unwrap());
    assert!(matches!(
        employee.get("notes"),
        Err(AccessError::NotLoaded { .. })
    ));

    let notes = employee.load("notes", &mut session).unwrap();
    assert_eq!(notes, Value::from("likes engines"));
    assert!(employee.is_loaded("notes").unwrap());
    assert_eq!(log.lock().len(), 2);
    assert!(log.lock()[1].starts_with(r#"SELECT "tabEmployees"."notes" FROM "tabEmployees""#));

    // a second read is served from memory
    employee.load("notes", &mut session).unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_loading_is_not_a_change() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 1).unwrap().unwrap();
    employee.load("notes", &mut session).unwrap();
    session.flush().unwrap();
    assert!(writes(&log).is_empty());
}

#[test]
fn test_writing_unloaded_attribute_updates_only_it() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 2).unwrap().unwrap();
    employee.set("notes", "prefers compilers").unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with(r#"UPDATE "tabEmployees" SET "notes" = ?"#));
    assert!(!writes[0].contains("salary"));
    assert_eq!(
        scalar(&mut session, "SELECT notes FROM tabEmployees WHERE id = 2"),
        Value::from("prefers compilers")
    );
    assert_eq!(
        scalar(&mut session, "SELECT name FROM tabEmployees WHERE id = 2"),
        Value::from("Grace")
    );
}

#[test]
fn test_only_changed_columns_are_written() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 3).unwrap().unwrap();
    employee.set("salary", 95).unwrap();
    employee.set("name", "Linus").unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].contains(r#""salary" = ?"#));
    assert!(!writes[0].contains(r#""name""#));
}

#[test]
fn test_flush_twice_writes_once() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 3).unwrap().unwrap();
    employee.set("salary", 91).unwrap();
    session.flush().unwrap();
    session.flush().unwrap();
    assert_eq!(writes(&log).len(), 1);
}

#[test]
fn test_lazy_reference_loads_target() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let employee = session.find("Employee", 3).unwrap().unwrap();
    assert_eq!(
        employee.reference_key("department").unwrap(),
        Some(KeyValue::Integer(2))
    );
    assert_eq!(log.lock().len(), 1);

    let department = session.reference(&employee, "department").unwrap().unwrap();
    assert_eq!(department.get("name").unwrap(), Value::from("Sales"));
    let again = session.reference(&employee, "department").unwrap().unwrap();
    assert!(again.ptr_eq(&department));
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_lazy_collection_loads_once() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    let research = session.find("Department", 1).unwrap().unwrap();
    let employees = session.collection(&research, "employees").unwrap();
    assert_eq!(employees.len(), 2);
    assert!(employees.iter().any(|e| e.ptr_eq(&ada)));

    let queries = log.lock().len();
    session.collection(&research, "employees").unwrap();
    assert_eq!(log.lock().len(), queries);
}

#[test]
fn test_detached_instances_cannot_load() {
    let factory = hr_factory();
    let (mut session, _log) = recorded(&factory);

    let employee = session.find("Employee", 1).unwrap().unwrap();
    session.evict(&employee);
    assert!(matches!(
        session.load_attribute(&employee, "notes"),
        Err(SessionError::Access(AccessError::Detached(_)))
    ));
}

fn document_factory() -> SessionFactory {
    let metamodel = Metamodel::builder()
        .entity(
            EntityBuilder::new("Document")
                .id("id", ValueType::Integer)
                .attribute(Attribute::new("title", ValueType::Text))
                .attribute(Attribute::new("summary", ValueType::Text).lazy())
                .attribute(Attribute::new("body", ValueType::Text).lazy()),
        )
        .build()
        .unwrap();
    SessionFactory::builder(metamodel).build()
}

#[test]
fn test_lazy_columns_are_written_independently_across_sessions() {
    let path = std::env::temp_dir().join(format!("relata-lazy-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let factory = document_factory();

    let mut first = factory.open_session(SqliteConnection::open(&path).unwrap());
    factory.export_schema(first.connection()).unwrap();
    first
        .connection()
        .execute_batch("INSERT INTO document (id, title) VALUES (1, 'Draft')")
        .unwrap();
    let document = first.find("Document", 1).unwrap().unwrap();
    document.set("summary", "short").unwrap();
    first.flush().unwrap();
    first.close().unwrap();

    let mut second = factory.open_session(SqliteConnection::open(&path).unwrap());
    let document = second.find("Document", 1).unwrap().unwrap();
    assert!(!document.is_loaded("summary").unwrap());
    document.set("body", "long").unwrap();
    second.flush().unwrap();
    second.close().unwrap();

    let mut third = factory.open_session(SqliteConnection::open(&path).unwrap());
    let document = third.find("Document", 1).unwrap().unwrap();
    assert_eq!(document.load("summary", &mut third).unwrap(), Value::from("short"));
    assert_eq!(document.load("body", &mut third).unwrap(), Value::from("long"));
    assert_eq!(document.get("title").unwrap(), Value::from("Draft"));
    third.close().unwrap();
    drop(third);

    let _ = std::fs::remove_file(&path);
}
