//! End-to-end unit-of-work scenarios over the HR mapping.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use relata::config::Settings;
use relata::engine::{KeyValue, Value};
use relata::session::{InMemoryCache, ResultValue, SessionError};
use relata::{Entity, SessionFactory, Status};

use common::{hr_factory, hr_metamodel, open, recorded, scalar, seed, RecordingConnection};

#[test]
fn test_persist_and_commit() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    session.begin().unwrap();
    let hire = Entity::new(factory.metamodel().get("Employee").unwrap());
    hire.set("name", "Barbara").unwrap();
    hire.set("salary", 110).unwrap();
    session.persist(&hire).unwrap();
    assert_eq!(hire.id(), Some(KeyValue::Integer(4)));
    assert_eq!(session.status_of(&hire), Some(Status::Managed));
    session.commit().unwrap();

    assert!(!session.connection().in_transaction());
    assert_eq!(
        scalar(&mut session, "SELECT name FROM tabEmployees WHERE id = 4"),
        Value::from("Barbara")
    );
}

#[test]
fn test_rollback_discards_flushed_writes() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    session.begin().unwrap();
    let ada = session.find("Employee", 1).unwrap().unwrap();
    ada.set("salary", 500).unwrap();
    session.flush().unwrap();
    assert_eq!(
        scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 1"),
        Value::Integer(500)
    );
    session.rollback().unwrap();

    assert_eq!(
        scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 1"),
        Value::Integer(100)
    );
    // in-memory state is left as it was
    assert_eq!(ada.get("salary").unwrap(), Value::Integer(500));
}

#[test]
fn test_queries_with_parameters() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let names = session
        .create_query("select e.name from Employee e where e.salary > :min order by e.salary desc")
        .bind("min", 95)
        .list()
        .unwrap();
    assert_eq!(
        names,
        vec![
            ResultValue::Value(Value::from("Grace")),
            ResultValue::Value(Value::from("Ada")),
        ]
    );

    let rows = session
        .create_query("select e.name, d.name from Employee e join e.department d where d.name = ?1 order by e.id")
        .bind_at(1, "Research")
        .list()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        ResultValue::Tuple(vec![
            ResultValue::Value(Value::from("Ada")),
            ResultValue::Value(Value::from("Research")),
        ])
    );

    let linus = session
        .create_query("from Employee e where e.name = :name")
        .bind("name", "Linus")
        .unique_result()
        .unwrap()
        .and_then(ResultValue::into_entity)
        .unwrap();
    assert!(linus.ptr_eq(&session.find("Employee", 3).unwrap().unwrap()));

    assert!(matches!(
        session.create_query("from Employee e where e.salary > 0").unique_result(),
        Err(SessionError::NonUniqueResult(3))
    ));
    assert!(matches!(
        session.create_query("from Employee e where e.name = :name").list(),
        Err(SessionError::UnboundParameter(_))
    ));
    assert!(matches!(
        session.create_query("delete from Employee e where e.id = 1").list(),
        Err(SessionError::NotASelect(_))
    ));
}

#[test]
fn test_cascade_remove_through_collection() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let research = session.find("Department", 1).unwrap().unwrap();
    session.remove(&research).unwrap();
    session.flush().unwrap();

    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM tabEmployees"),
        Value::Integer(1)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM employee_details"),
        Value::Integer(0)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM department"),
        Value::Integer(1)
    );
}

#[test]
fn test_remove_before_flush_forgets_instance() {
    let factory = hr_factory();
    let mut session = open(&factory);

    let department = Entity::new(factory.metamodel().get("Department").unwrap());
    department.set("name", "Temporary").unwrap();
    session.persist(&department).unwrap();
    session.remove(&department).unwrap();

    assert_eq!(department.status(), Status::Transient);
    assert!(session.identity_map().is_empty());
    session.flush().unwrap();
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM department"),
        Value::Integer(0)
    );
}

#[test]
fn test_subclass_spans_parent_and_own_table() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let manager = Entity::new(factory.metamodel().get("Manager").unwrap());
    manager.set("name", "Margaret").unwrap();
    manager.set("salary", 150).unwrap();
    manager.set("level", 3).unwrap();
    session.persist(&manager).unwrap();
    session.flush().unwrap();

    let id = manager.id().unwrap();
    assert_eq!(id, KeyValue::Integer(4));
    assert_eq!(
        scalar(&mut session, "SELECT name FROM tabEmployees WHERE id = 4"),
        Value::from("Margaret")
    );
    assert_eq!(
        scalar(&mut session, "SELECT level FROM manager WHERE id = 4"),
        Value::Integer(3)
    );

    session.clear();
    let reloaded = session.find("Manager", 4).unwrap().unwrap();
    assert!(!reloaded.ptr_eq(&manager));
    assert_eq!(reloaded.get("name").unwrap(), Value::from("Margaret"));
    assert_eq!(reloaded.get("level").unwrap(), Value::Integer(3));
}

#[test]
fn test_second_level_cache_across_sessions() {
    let factory = SessionFactory::builder(hr_metamodel())
        .second_level_cache(Arc::new(InMemoryCache::new()))
        .build();
    let (mut session, log) = recorded(&factory);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    assert_eq!(log.lock().len(), 1);
    session.clear();
    let again = session.find("Employee", 1).unwrap().unwrap();
    assert!(!again.ptr_eq(&ada));
    assert_eq!(again.get("name").unwrap(), Value::from("Ada"));
    assert_eq!(log.lock().len(), 1);

    // another session over an empty database still sees the cached row
    let mut other = factory.open_session(common::database(&factory));
    let cached = other.find("Employee", 1).unwrap().unwrap();
    assert_eq!(cached.get("salary").unwrap(), Value::Integer(100));

    // writes invalidate
    again.set("salary", 101).unwrap();
    session.flush().unwrap();
    session.clear();
    let reread = session.find("Employee", 1).unwrap().unwrap();
    assert_eq!(reread.get("salary").unwrap(), Value::Integer(101));
    assert_eq!(
        log.lock().iter().filter(|sql| sql.starts_with("SELECT")).count(),
        2
    );
}

#[test]
fn test_second_level_cache_from_settings() {
    let mut settings = Settings::default();
    settings.cache.second_level = true;
    let factory = SessionFactory::builder(hr_metamodel())
        .settings(settings)
        .build();
    assert!(factory.second_level_cache().is_some());

    let (connection, log) = RecordingConnection::new(common::database(&factory));
    let mut session = factory.open_session(connection);
    seed(&mut session);
    log.lock().clear();

    session.find("Department", 2).unwrap();
    session.clear();
    session.find("Department", 2).unwrap();
    assert_eq!(log.lock().len(), 1);

    // bulk statements clear the cache
    session
        .create_query("update Department d set d.name = 'Field Sales' where d.id = 2")
        .execute_update()
        .unwrap();
    session.clear();
    let renamed = session.find("Department", 2).unwrap().unwrap();
    assert_eq!(renamed.get("name").unwrap(), Value::from("Field Sales"));
}

#[test]
fn test_closed_session_rolls_back() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    session.begin().unwrap();
    session
        .connection()
        .execute("UPDATE tabEmployees SET salary = 0", &[])
        .unwrap();
    session.close().unwrap();

    assert!(!session.is_open());
    assert_eq!(ada.status(), Status::Detached);
    assert!(matches!(session.find("Employee", 1), Err(SessionError::Closed)));
    assert_eq!(
        scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 1"),
        Value::Integer(100)
    );
}
