//! Integration tests for the order of writes within one flush.

#[path = "../common/mod.rs"]
mod common;

use relata::flush::FlushError;
use relata::metamodel::{Association, Attribute, EntityBuilder, Metamodel, ValueType};
use relata::session::SessionError;
use relata::{Entity, SessionFactory, Status};

use common::{hr_factory, open, recorded, scalar, writes};

#[test]
fn test_cascade_persist_inserts_parent_first() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);
    let metamodel = factory.metamodel();

    let department = Entity::new(metamodel.get("Department").unwrap());
    department.set("name", "Compilers").unwrap();
    for name in ["Frances", "Jean"] {
        let employee = Entity::new(metamodel.get("Employee").unwrap());
        employee.set("name", name).unwrap();
        employee.set_reference("department", Some(&department)).unwrap();
        department.add("employees", &employee).unwrap();
    }

    session.persist(&department).unwrap();
    assert_eq!(session.identity_map().len(), 3);
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 3);
    assert!(writes[0].starts_with(r#"INSERT INTO "department""#));
    assert!(writes[1].starts_with(r#"INSERT INTO "tabEmployees""#));
    assert!(writes[2].starts_with(r#"INSERT INTO "tabEmployees""#));
    assert_eq!(
        scalar(
            &mut session,
            "SELECT count(*) FROM tabEmployees WHERE department_id = 3"
        ),
        relata::engine::Value::Integer(2)
    );
}

#[test]
fn test_cascade_remove_deletes_referencing_rows_first() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let sales = session.find("Department", 2).unwrap().unwrap();
    session.remove(&sales).unwrap();
    let linus = session.find("Employee", 3).unwrap();
    assert!(linus.is_none());
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 2);
    assert!(writes[0].starts_with(r#"DELETE FROM "tabEmployees""#));
    assert!(writes[1].starts_with(r#"DELETE FROM "department""#));
    assert_eq!(sales.status(), Status::Deleted);
    assert!(!session.contains(&sales));
}

#[test]
fn test_reference_to_unsaved_instance() {
    let factory = hr_factory();
    let mut session = open(&factory);
    let metamodel = factory.metamodel();

    let department = Entity::new(metamodel.get("Department").unwrap());
    department.set("name", "Ghost").unwrap();
    let employee = Entity::new(metamodel.get("Employee").unwrap());
    employee.set_reference("department", Some(&department)).unwrap();
    session.persist(&employee).unwrap();

    assert!(matches!(
        session.flush(),
        Err(SessionError::Flush(FlushError::TransientReference { association, .. }))
            if association == "department"
    ));
}

fn pairing_factory() -> SessionFactory {
    let metamodel = Metamodel::builder()
        .entity(
            EntityBuilder::new("Dancer")
                .id("id", ValueType::Integer)
                .attribute(Attribute::new("name", ValueType::Text))
                .association(Association::to_one("partner", "Dancer"))
                .association(Association::to_one("coach", "Coach")),
        )
        .entity(
            EntityBuilder::new("Coach")
                .id("id", ValueType::Integer)
                .association(Association::to_one("star", "Dancer")),
        )
        .build()
        .unwrap();
    SessionFactory::builder(metamodel).build()
}

fn dancer(factory: &SessionFactory, id: i64) -> Entity {
    let entity = Entity::new(factory.metamodel().get("Dancer").unwrap());
    entity.set_id(id).unwrap();
    entity
}

#[test]
fn test_self_reference_is_not_a_cycle() {
    let factory = pairing_factory();
    let mut session = open(&factory);

    let soloist = dancer(&factory, 1);
    soloist.set_reference("partner", Some(&soloist)).unwrap();
    session.persist(&soloist).unwrap();
    session.flush().unwrap();
    assert_eq!(
        scalar(&mut session, "SELECT partner_id FROM dancer WHERE id = 1"),
        relata::engine::Value::Integer(1)
    );
}

#[test]
fn test_mutual_references_between_new_instances_are_rejected() {
    let factory = pairing_factory();
    let mut session = open(&factory);

    let dancer = dancer(&factory, 1);
    let coach = Entity::new(factory.metamodel().get("Coach").unwrap());
    coach.set_id(7).unwrap();
    dancer.set_reference("coach", Some(&coach)).unwrap();
    coach.set_reference("star", Some(&dancer)).unwrap();
    session.persist(&dancer).unwrap();
    session.persist(&coach).unwrap();

    match session.flush() {
        Err(SessionError::Flush(FlushError::CyclicDependency(members))) => {
            assert_eq!(members.len(), 2);
        }
        other => panic!("expected a cycle, got {:?}", other.map(|_| ())),
    }
    // nothing was written, so breaking the cycle lets the flush through
    assert!(!session.is_poisoned());
    coach.set_reference("star", None).unwrap();
    session.flush().unwrap();
    assert_eq!(
        scalar(&mut session, "SELECT coach_id FROM dancer WHERE id = 1"),
        relata::engine::Value::Integer(7)
    );
}

#[test]
fn test_failed_write_poisons_session() {
    let factory = hr_factory();
    let mut session = open(&factory);

    // name is NOT NULL
    let department = Entity::new(factory.metamodel().get("Department").unwrap());
    session.persist(&department).unwrap();
    assert!(matches!(
        session.flush(),
        Err(SessionError::Connection(_))
    ));
    assert!(session.is_poisoned());
    assert!(matches!(session.flush(), Err(SessionError::Poisoned)));
}
