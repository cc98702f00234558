//! Integration tests for the session identity map.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::{KeyValue, Value};
use relata::session::{AccessError, ResultValue, SessionError};
use relata::{Entity, Status};

use common::{hr_factory, open, recorded, seed};

#[test]
fn test_find_returns_one_instance_per_row() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let first = session.find("Employee", 1).unwrap().unwrap();
    let second = session.find("org.acme.Employee", 1).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(log.lock().len(), 1);
    assert_eq!(first.get("name").unwrap(), Value::from("Ada"));
    assert_eq!(first.status(), Status::Managed);
}

#[test]
fn test_query_results_share_instances_with_find() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let found = session.find("Employee", 2).unwrap().unwrap();
    found.set("name", "Grace Hopper").unwrap();

    let rows = session
        .create_query("from Employee e where e.department = 1 order by e.id")
        .list()
        .unwrap();
    assert_eq!(rows.len(), 2);
    let listed = rows[1].as_entity().unwrap();
    assert!(listed.ptr_eq(&found));
    // the pending change is not overwritten by the re-read row
    assert_eq!(listed.get("name").unwrap(), Value::from("Grace Hopper"));
}

#[test]
fn test_missing_row() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);
    assert!(session.find("Employee", 99).unwrap().is_none());
    assert!(session.identity_map().is_empty());
}

#[test]
fn test_unknown_entity() {
    let factory = hr_factory();
    let mut session = open(&factory);
    assert!(matches!(
        session.find("Payroll", 1),
        Err(SessionError::UnknownEntity(name)) if name == "Payroll"
    ));
}

#[test]
fn test_evict_detaches() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let first = session.find("Employee", 1).unwrap().unwrap();
    session.evict(&first);
    assert_eq!(first.status(), Status::Detached);
    assert!(!session.contains(&first));
    assert!(matches!(
        first.set("name", "x"),
        Err(AccessError::Detached(_))
    ));

    let again = session.find("Employee", 1).unwrap().unwrap();
    assert!(!again.ptr_eq(&first));
    assert_eq!(session.status_of(&again), Some(Status::Managed));
}

#[test]
fn test_clear_detaches_everything() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let rows = session.create_query("from Employee").list().unwrap();
    assert_eq!(session.identity_map().len(), 3);
    session.clear();
    assert_eq!(session.identity_map().len(), 0);
    assert!(rows
        .iter()
        .filter_map(ResultValue::as_entity)
        .all(|e| e.status() == Status::Detached));
}

#[test]
fn test_duplicate_identity_rejected() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);
    session.find("Employee", 1).unwrap().unwrap();

    let copy = Entity::new(factory.metamodel().get("Employee").unwrap());
    copy.set_id(1).unwrap();
    assert!(matches!(
        session.persist(&copy),
        Err(SessionError::NonUniqueObject(_))
    ));
}

#[test]
fn test_subclass_shares_root_key_space() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);
    session.find("Employee", 3).unwrap().unwrap();

    let manager = Entity::new(factory.metamodel().get("Manager").unwrap());
    manager.set_id(3).unwrap();
    let err = session.persist(&manager).unwrap_err();
    assert!(matches!(err, SessionError::NonUniqueObject(key) if key == "org.acme.Employee#3"));
}

#[test]
fn test_persisted_instance_is_found_without_a_query() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let account = Entity::new(factory.metamodel().get("Account").unwrap());
    account.set_id("ACC-1").unwrap();
    account.set("owner", "Ada").unwrap();
    session.persist(&account).unwrap();

    let found = session.find("Account", "ACC-1").unwrap().unwrap();
    assert!(found.ptr_eq(&account));
    assert!(log.lock().is_empty());
    assert_eq!(account.id(), Some(KeyValue::Text("ACC-1".into())));
}

#[test]
fn test_closed_session_refuses_work() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);
    let employee = session.find("Employee", 1).unwrap().unwrap();

    session.close().unwrap();
    assert!(!session.is_open());
    assert_eq!(employee.status(), Status::Detached);
    assert!(matches!(
        session.find("Employee", 1),
        Err(SessionError::Closed)
    ));
}

#[test]
fn test_fetch_join_keeps_pending_reference() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    let sales = session.find("Department", 2).unwrap().unwrap();
    ada.set_reference("department", Some(&sales)).unwrap();

    let rows = session
        .create_query("select e from Employee e join fetch e.department d")
        .list()
        .unwrap();
    assert_eq!(rows.len(), 3);
    let department = session.reference(&ada, "department").unwrap().unwrap();
    assert!(department.ptr_eq(&sales));

    session.flush().unwrap();
    assert_eq!(
        common::scalar(&mut session, "SELECT department_id FROM tabEmployees WHERE id = 1"),
        Value::Integer(2)
    );
}

#[test]
fn test_fetch_join_binds_unresolved_reference() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);
    seed(&mut session);

    let grace = session.find("Employee", 2).unwrap().unwrap();
    session
        .create_query("select e from Employee e join fetch e.department d where e.id = 2")
        .list()
        .unwrap();
    let before = log.lock().len();
    let department = session.reference(&grace, "department").unwrap().unwrap();
    assert_eq!(department.get("name").unwrap(), Value::from("Research"));
    assert_eq!(log.lock().len(), before);
}

#[test]
fn test_fetch_join_keeps_loaded_collection() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let research = session.find("Department", 1).unwrap().unwrap();
    assert_eq!(session.collection(&research, "employees").unwrap().len(), 2);
    let hire = Entity::new(factory.metamodel().get("Employee").unwrap());
    hire.set("name", "Barbara").unwrap();
    research.add("employees", &hire).unwrap();

    session
        .create_query("select d from Department d join fetch d.employees e where d.id = 1")
        .list()
        .unwrap();
    let employees = session.collection(&research, "employees").unwrap();
    assert_eq!(employees.len(), 3);
    assert!(employees.iter().any(|e| e.ptr_eq(&hire)));
}

#[test]
fn test_query_skips_removed_instances() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    session.remove(&ada).unwrap();
    assert!(session.find("Employee", 1).unwrap().is_none());

    let rows = session
        .create_query("select e from Employee e where e.id = 1")
        .list()
        .unwrap();
    assert!(rows.is_empty());

    let rows = session
        .create_query("select e from Employee e order by e.id")
        .list()
        .unwrap();
    let names: Vec<Value> = rows
        .iter()
        .filter_map(ResultValue::as_entity)
        .map(|e| e.get("name").unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("Grace"), Value::from("Linus")]);
}

#[test]
fn test_commit_without_begin() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    ada.set("salary", 777).unwrap();
    session.commit().unwrap();
    assert!(!session.connection().in_transaction());
    assert_eq!(
        common::scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 1"),
        Value::Integer(777)
    );
}
