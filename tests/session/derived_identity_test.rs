//! One-to-one with a derived identifier: `PersonInfo` is keyed by the
//! person it describes, and `Person` sees it through an inverse side.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::{KeyValue, SqliteConnection, Value};
use relata::metamodel::{Association, Attribute, EntityBuilder, Metamodel, ValueType};
use relata::session::{ResultValue, SessionError};
use relata::{Entity, SessionFactory};

use common::{database, scalar, RecordingConnection};

fn person_factory() -> SessionFactory {
    let metamodel = Metamodel::builder()
        .entity(
            EntityBuilder::new("Person")
                .qualified_name("org.acme.Person")
                .id("id", ValueType::Integer)
                .attribute(Attribute::new("name", ValueType::Text))
                .association(Association::one_to_one_inverse("info", "PersonInfo", "person")),
        )
        .entity(
            EntityBuilder::new("PersonInfo")
                .qualified_name("org.acme.PersonInfo")
                .derived_id("person")
                .association(Association::to_one("person", "Person"))
                .attribute(Attribute::new("info", ValueType::Text)),
        )
        .build()
        .unwrap();
    SessionFactory::builder(metamodel).build()
}

fn person(factory: &SessionFactory, id: i64, name: &str) -> Entity {
    let person = Entity::new(factory.metamodel().get("Person").unwrap());
    person.set_id(id).unwrap();
    person.set("name", name).unwrap();
    person
}

fn info_for(factory: &SessionFactory, person: &Entity, text: &str) -> Entity {
    let info = Entity::new(factory.metamodel().get("PersonInfo").unwrap());
    info.set_reference("person", Some(person)).unwrap();
    info.set("info", text).unwrap();
    info
}

#[test]
fn test_persist_then_find_in_new_session() {
    let path = std::env::temp_dir().join(format!("relata-derived-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let factory = person_factory();

    let mut first = factory.open_session(SqliteConnection::open(&path).unwrap());
    factory.export_schema(first.connection()).unwrap();
    let alfio = person(&factory, 1, "Alfio");
    let info = info_for(&factory, &alfio, "Some information");
    first.persist(&alfio).unwrap();
    first.persist(&info).unwrap();
    assert_eq!(info.id(), Some(KeyValue::Integer(1)));
    first.commit().unwrap();
    assert_eq!(
        scalar(&mut first, "SELECT info FROM person_info WHERE person_id = 1"),
        Value::from("Some information")
    );
    first.close().unwrap();

    let mut second = factory.open_session(SqliteConnection::open(&path).unwrap());
    let found = second.find("Person", 1).unwrap().unwrap();
    assert_eq!(found.get("name").unwrap(), Value::from("Alfio"));

    let loaded = second.reference(&found, "info").unwrap().unwrap();
    assert_eq!(loaded.get("info").unwrap(), Value::from("Some information"));
    assert_eq!(loaded.id(), Some(KeyValue::Integer(1)));
    let by_id = second.find("PersonInfo", 1).unwrap().unwrap();
    assert!(by_id.ptr_eq(&loaded));
    let back = second.reference(&loaded, "person").unwrap().unwrap();
    assert!(back.ptr_eq(&found));
    second.close().unwrap();
    drop(second);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_inverse_side_without_owner_is_cached_as_absent() {
    let factory = person_factory();
    let (connection, log) = RecordingConnection::new(database(&factory));
    let mut session = factory.open_session(connection);
    session
        .connection()
        .execute_batch("INSERT INTO person (id, name) VALUES (7, 'Lone')")
        .unwrap();

    let lone = session.find("Person", 7).unwrap().unwrap();
    assert!(session.reference(&lone, "info").unwrap().is_none());
    let queries = log.lock().len();
    assert!(session.reference(&lone, "info").unwrap().is_none());
    assert_eq!(log.lock().len(), queries);
}

#[test]
fn test_join_through_inverse_side() {
    let factory = person_factory();
    let mut session = factory.open_session(database(&factory));
    session
        .connection()
        .execute_batch(
            "INSERT INTO person (id, name) VALUES (1, 'Alfio'), (2, 'Beppe');
             INSERT INTO person_info (person_id, info) VALUES (2, 'tenor');",
        )
        .unwrap();

    let rows = session
        .create_query("select p.name from Person p join p.info i where i.info = 'tenor'")
        .list()
        .unwrap();
    assert_eq!(rows, vec![ResultValue::Value(Value::from("Beppe"))]);

    let rows = session
        .create_query("select p from Person p join fetch p.info i")
        .list()
        .unwrap();
    let beppe = rows[0].as_entity().unwrap();
    let before = session.identity_map().len();
    let info = session.reference(beppe, "info").unwrap().unwrap();
    assert_eq!(info.get("info").unwrap(), Value::from("tenor"));
    assert_eq!(session.identity_map().len(), before);
}

#[test]
fn test_derived_identifier_needs_a_target() {
    let factory = person_factory();
    let mut session = factory.open_session(database(&factory));
    let orphan = Entity::new(factory.metamodel().get("PersonInfo").unwrap());
    orphan.set("info", "nobody").unwrap();
    assert!(matches!(
        session.persist(&orphan),
        Err(SessionError::MissingIdentifier(name)) if name == "org.acme.PersonInfo"
    ));
}
