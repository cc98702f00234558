//! Integration tests for bulk UPDATE and DELETE: how they are planned, and
//! what they do to a real database.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use relata::engine::Value;
use relata::metamodel::{Attribute, EntityBuilder, Metamodel, ValueType};
use relata::resolve::{ImportCache, Resolver};
use relata::sql::Dialect;
use relata::translate::{MutationPlan, TableMutationKind, Translation, Translator};

use common::{hr_factory, open, scalar, seed};

fn person_metamodel() -> Metamodel {
    Metamodel::builder()
        .entity(
            EntityBuilder::new("Person")
                .secondary_table("person_address", false)
                .secondary_table("person_profile", true)
                .id("id", ValueType::Integer)
                .attribute(Attribute::new("name", ValueType::Text))
                .attribute(Attribute::new("city", ValueType::Text).table("person_address"))
                .attribute(Attribute::new("motto", ValueType::Text).table("person_profile")),
        )
        .build()
        .unwrap()
}

fn mutation(text: &str) -> MutationPlan {
    let resolver = Resolver::new(Arc::new(person_metamodel()), Arc::new(ImportCache::new(8)));
    let resolved = resolver.resolve_text(text).unwrap();
    match Translator::new(Dialect::Sqlite).translate(&resolved[0]).unwrap() {
        Translation::Mutation(plan) => plan,
        other => panic!("expected mutation, got {other:?}"),
    }
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_secondary_update_touches_only_its_table() {
    let MutationPlan::Direct(statement) =
        mutation("update Person p set p.city = 'Oslo' where p.id = 1")
    else {
        panic!("expected direct statement");
    };
    insta::assert_snapshot!(statement.sql, @r#"UPDATE "person_address" SET "city" = 'Oslo' WHERE "person_address"."id" = 1"#);
}

#[test]
fn test_optional_secondary_update_is_restricted() {
    let MutationPlan::Restricted {
        id_query,
        statements,
    } = mutation("update Person p set p.motto = :motto where p.name = 'Ada'")
    else {
        panic!("expected restricted plan");
    };
    insta::assert_snapshot!(id_query.sql, @r#"SELECT "p1_0"."id" FROM "person" AS "p1_0" WHERE "p1_0"."name" = 'Ada'"#);
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].table, "person_profile");
    assert!(matches!(
        statements[0].kind,
        TableMutationKind::Update {
            insert_missing: true,
            ..
        }
    ));
}

#[test]
fn test_update_reading_columns_does_not_insert() {
    let MutationPlan::Restricted { statements, .. } =
        mutation("update Person p set p.motto = p.motto || '!'")
    else {
        panic!("expected restricted plan");
    };
    assert!(statements[0].render_insert(Dialect::Sqlite).is_none());
}

#[test]
fn test_update_spanning_tables() {
    let MutationPlan::Restricted { statements, .. } =
        mutation("update Person p set p.name = 'x', p.city = 'y' where p.id = 1")
    else {
        panic!("expected restricted plan");
    };
    let tables: Vec<_> = statements.iter().map(|s| s.table.as_str()).collect();
    assert_eq!(tables, vec!["person", "person_address"]);
}

#[test]
fn test_delete_removes_secondary_rows_first() {
    let MutationPlan::Restricted { statements, .. } =
        mutation("delete from Person p where p.city = 'Oslo'")
    else {
        panic!("expected restricted plan");
    };
    let tables: Vec<_> = statements.iter().map(|s| s.table.as_str()).collect();
    assert_eq!(tables, vec!["person_profile", "person_address", "person"]);
    assert!(statements
        .iter()
        .all(|s| s.kind == TableMutationKind::Delete));
}

#[test]
fn test_postgres_identifier_placeholders_follow_bindings() {
    let resolver = Resolver::new(Arc::new(person_metamodel()), Arc::new(ImportCache::new(8)));
    let resolved = resolver
        .resolve_text("update Person p set p.motto = :motto")
        .unwrap();
    let Translation::Mutation(MutationPlan::Restricted { statements, .. }) =
        Translator::new(Dialect::Postgres).translate(&resolved[0]).unwrap()
    else {
        panic!("expected restricted plan");
    };
    insta::assert_snapshot!(statements[0].render(Dialect::Postgres, 2), @r#"UPDATE "person_profile" SET "motto" = $1 WHERE "person_profile"."id" IN ($2, $3)"#);
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_direct_update_executes() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let affected = session
        .create_query("update Employee e set e.salary = e.salary + 10 where e.department = 1")
        .execute_update()
        .unwrap();
    assert_eq!(affected, 2);
    assert_eq!(
        scalar(&mut session, "SELECT salary FROM tabEmployees WHERE id = 2"),
        Value::Integer(130)
    );
}

#[test]
fn test_optional_update_inserts_missing_rows() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let affected = session
        .create_query("update Employee e set e.bio = :bio where e.department = 1")
        .bind("bio", "engineer")
        .execute_update()
        .unwrap();
    assert_eq!(affected, 2);
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM employee_details WHERE bio = 'engineer'"),
        Value::Integer(2)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM employee_details WHERE id = 3"),
        Value::Integer(0)
    );
}

#[test]
fn test_delete_by_secondary_predicate() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let affected = session
        .create_query("delete from Employee e where e.bio = 'analyst'")
        .execute_update()
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM tabEmployees"),
        Value::Integer(2)
    );
    assert_eq!(
        scalar(&mut session, "SELECT count(*) FROM employee_details"),
        Value::Integer(0)
    );
}

#[test]
fn test_no_match_affects_nothing() {
    let factory = hr_factory();
    let mut session = open(&factory);
    seed(&mut session);

    let affected = session
        .create_query("delete from Employee e where e.bio = 'nobody'")
        .execute_update()
        .unwrap();
    assert_eq!(affected, 0);
}

#[test]
fn test_select_is_not_a_mutation() {
    let factory = hr_factory();
    let mut session = open(&factory);
    assert!(matches!(
        session.create_query("from Employee e").execute_update(),
        Err(relata::session::SessionError::NotAMutation(_))
    ));
}
