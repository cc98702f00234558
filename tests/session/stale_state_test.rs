//! Integration tests for optimistic locking and rows changed underneath a
//! session.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::{KeyValue, Value};
use relata::session::{SessionError, StaleStateError};
use relata::Entity;

use common::{hr_factory, open, recorded, scalar, seed, writes};

fn open_account(session: &mut relata::Session, factory: &relata::SessionFactory) -> Entity {
    let account = Entity::new(factory.metamodel().get("Account").unwrap());
    account.set_id("A-1").unwrap();
    account.set("owner", "Ada").unwrap();
    account.set("balance", 100).unwrap();
    session.persist(&account).unwrap();
    session.flush().unwrap();
    account
}

#[test]
fn test_version_starts_at_zero_and_increments() {
    let factory = hr_factory();
    let (mut session, log) = recorded(&factory);

    let account = open_account(&mut session, &factory);
    assert_eq!(account.get("version").unwrap(), Value::Integer(0));

    account.set("balance", 150).unwrap();
    session.flush().unwrap();
    assert_eq!(account.get("version").unwrap(), Value::Integer(1));
    assert_eq!(
        scalar(&mut session, "SELECT version FROM account WHERE number = 'A-1'"),
        Value::Integer(1)
    );

    let update = &writes(&log)[1];
    assert!(update.starts_with(r#"UPDATE "account" SET "balance" = ?, "version" = ?"#));
    assert!(update.ends_with(r#"AND "account"."version" = ?"#));
}

#[test]
fn test_concurrent_version_bump_is_stale() {
    let factory = hr_factory();
    let mut session = open(&factory);
    let account = open_account(&mut session, &factory);

    session
        .connection()
        .execute("UPDATE account SET version = 5 WHERE number = 'A-1'", &[])
        .unwrap();
    account.set("balance", 0).unwrap();

    match session.flush() {
        Err(SessionError::Stale(StaleStateError { entity, id })) => {
            assert_eq!(entity, "org.acme.Account");
            assert_eq!(id, KeyValue::from("A-1"));
        }
        other => panic!("expected a stale row, got {:?}", other.map(|_| ())),
    }
    assert!(session.is_poisoned());
    assert_eq!(
        scalar(&mut session, "SELECT balance FROM account WHERE number = 'A-1'"),
        Value::Integer(100)
    );
}

#[test]
fn test_versioned_delete_checks_version() {
    let factory = hr_factory();
    let mut session = open(&factory);
    let account = open_account(&mut session, &factory);

    session
        .connection()
        .execute("UPDATE account SET version = 1 WHERE number = 'A-1'", &[])
        .unwrap();
    session.remove(&account).unwrap();
    assert!(matches!(session.flush(), Err(SessionError::Stale(_))));
}

#[test]
fn test_update_of_vanished_row_is_stale() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let linus = session.find("Employee", 3).unwrap().unwrap();
    session
        .connection()
        .execute("DELETE FROM tabEmployees WHERE id = 3", &[])
        .unwrap();
    linus.set("salary", 95).unwrap();

    assert!(matches!(
        session.flush(),
        Err(SessionError::Stale(StaleStateError { id: KeyValue::Integer(3), .. }))
    ));
}

#[test]
fn test_delete_of_vanished_row_is_stale() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let grace = session.find("Employee", 2).unwrap().unwrap();
    session
        .connection()
        .execute("DELETE FROM tabEmployees WHERE id = 2", &[])
        .unwrap();
    session.remove(&grace).unwrap();
    assert!(matches!(session.flush(), Err(SessionError::Stale(_))));
}

#[test]
fn test_failed_commit_rolls_back_earlier_writes() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    session.begin().unwrap();
    let ada = session.find("Employee", 1).unwrap().unwrap();
    let linus = session.find("Employee", 3).unwrap().unwrap();
    ada.set("salary", 1).unwrap();
    linus.set("salary", 2).unwrap();
    session
        .connection()
        .execute("DELETE FROM tabEmployees WHERE id = 3", &[])
        .unwrap();

    assert!(matches!(session.commit(), Err(SessionError::Stale(_))));
    assert!(!session.connection().in_transaction());
    // the delete above was part of the rolled back transaction too
    assert_eq!(
        scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 1"),
        Value::Integer(100)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM tabEmployees WHERE id = 3"),
        Value::Integer(1)
    );
}
