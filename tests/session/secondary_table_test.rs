//! Integration tests for entities spread over a primary and an optional
//! secondary table.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::Value;
use relata::Entity;

use common::{hr_factory, recorded, scalar, writes};

#[test]
fn test_secondary_only_change_leaves_primary_alone() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    assert_eq!(ada.get("bio").unwrap(), Value::from("analyst"));
    ada.set("bio", "engineer").unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with(r#"UPDATE "employee_details" SET "bio" = ?"#));
    assert_eq!(
        scalar(&mut session, "SELECT bio FROM employee_details WHERE id = 1"),
        Value::from("engineer")
    );
}

#[test]
fn test_missing_secondary_row_is_inserted() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let grace = session.find("Employee", 2).unwrap().unwrap();
    assert_eq!(grace.get("bio").unwrap(), Value::Null);
    grace.set("bio", "admiral").unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with(r#"INSERT INTO "employee_details""#));
    assert_eq!(
        scalar(&mut session, "SELECT bio FROM employee_details WHERE id = 2"),
        Value::from("admiral")
    );

    // the row now exists: the next change is an update
    grace.set("bio", "rear admiral").unwrap();
    session.flush().unwrap();
    let all = common::writes(&log);
    assert!(all[1].starts_with(r#"UPDATE "employee_details""#));
}

#[test]
fn test_clearing_every_secondary_column_deletes_the_row() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    ada.set("bio", Value::Null).unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with(r#"DELETE FROM "employee_details""#));
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM employee_details"),
        Value::Integer(0)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM tabEmployees WHERE id = 1"),
        Value::Integer(1)
    );
}

#[test]
fn test_new_instance_without_secondary_values_skips_the_row() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let descriptor = factory.metamodel().get("Employee").unwrap();
    let hire = Entity::new(descriptor);
    hire.set("name", "Barbara").unwrap();
    hire.set("salary", 80).unwrap();
    session.persist(&hire).unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with(r#"INSERT INTO "tabEmployees""#));

    let with_bio = Entity::new(descriptor);
    with_bio.set("name", "Frances").unwrap();
    with_bio.set("bio", "compiler pioneer").unwrap();
    session.persist(&with_bio).unwrap();
    session.flush().unwrap();
    let all = common::writes(&log);
    assert_eq!(all.len(), 3);
    assert!(all[1].starts_with(r#"INSERT INTO "tabEmployees""#));
    assert!(all[2].starts_with(r#"INSERT INTO "employee_details""#));
}

#[test]
fn test_removal_deletes_secondary_first() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let ada = session.find("Employee", 1).unwrap().unwrap();
    session.remove(&ada).unwrap();
    session.flush().unwrap();

    let writes = writes(&log);
    assert_eq!(writes.len(), 2);
    assert!(writes[0].starts_with(r#"DELETE FROM "employee_details""#));
    assert!(writes[1].starts_with(r#"DELETE FROM "tabEmployees""#));

    // no secondary row known to exist: only the primary row goes
    let linus = session.find("Employee", 3).unwrap().unwrap();
    session.remove(&linus).unwrap();
    session.flush().unwrap();
    let all = common::writes(&log);
    assert_eq!(all.len(), 3);
    assert!(all[2].starts_with(r#"DELETE FROM "tabEmployees""#));
}
