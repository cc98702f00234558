//! Integration tests for SELECT translation across dialects.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use relata::metamodel::{Attribute, EntityBuilder, Metamodel, ValueType};
use relata::oql::Parameter;
use relata::resolve::{ImportCache, Resolver};
use relata::sql::Dialect;
use relata::translate::{ResultItem, SelectPlan, Translation, Translator};
use sqlparser::dialect::{
    DuckDbDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

fn validate(sql: &str, dialect: Dialect) {
    let parser: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
    };
    if let Err(e) = Parser::parse_sql(&*parser, sql) {
        panic!("invalid SQL for {dialect:?}: {e}\n{sql}");
    }
}

/// A person spread over its own table, a mandatory address table and an
/// optional profile table.
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

fn select(metamodel: Metamodel, text: &str, dialect: Dialect) -> SelectPlan {
    let resolver = Resolver::new(Arc::new(metamodel), Arc::new(ImportCache::new(8)));
    let resolved = resolver.resolve_text(text).unwrap();
    match Translator::new(dialect).translate(&resolved[0]).unwrap() {
        Translation::Select(plan) => plan,
        other => panic!("expected select, got {other:?}"),
    }
}

fn hr_select(text: &str, dialect: Dialect) -> SelectPlan {
    select(common::hr_metamodel(), text, dialect)
}

// ============================================================================
// Table Joins
// ============================================================================

#[test]
fn test_full_select_joins_every_table() {
    let plan = select(person_metamodel(), "select p from Person p", Dialect::Sqlite);
    insta::assert_snapshot!(plan.statement.sql, @r#"SELECT "p1_0"."id", "p1_0"."name", "p1_1"."city", "p1_2"."motto", "p1_2"."id" FROM "person" AS "p1_0" INNER JOIN "person_address" AS "p1_1" ON "p1_1"."id" = "p1_0"."id" LEFT JOIN "person_profile" AS "p1_2" ON "p1_2"."id" = "p1_0"."id""#);
    validate(&plan.statement.sql, Dialect::Sqlite);
}

#[test]
fn test_only_referenced_tables_are_joined() {
    let plan = select(
        person_metamodel(),
        "select p.name from Person p where p.city = 'Oslo'",
        Dialect::Sqlite,
    );
    insta::assert_snapshot!(plan.statement.sql, @r#"SELECT "p1_0"."name" FROM "person" AS "p1_0" INNER JOIN "person_address" AS "p1_1" ON "p1_1"."id" = "p1_0"."id" WHERE "p1_1"."city" = 'Oslo'"#);
}

#[test]
fn test_lazy_attributes_are_not_selected() {
    let plan = hr_select("select e from Employee e", Dialect::Sqlite);
    assert!(!plan.statement.sql.contains("notes"));
    assert!(plan.statement.sql.contains(r#""e1_0"."department_id""#));
    let ResultItem::Entity { mapping, .. } = &plan.items[0] else {
        panic!("expected entity item");
    };
    let notes = mapping.entity.attribute("notes").unwrap().0;
    assert_eq!(mapping.attributes[notes], None);
}

#[test]
fn test_joined_subclass_reads_parent_table() {
    let plan = hr_select("select m from Manager m where m.level > 2", Dialect::Sqlite);
    let sql = &plan.statement.sql;
    assert!(sql.contains(r#"FROM "tabEmployees" AS "m1_0""#));
    assert!(sql.contains(r#"INNER JOIN "manager" AS "m1_2" ON "m1_2"."id" = "m1_0"."id""#));
    validate(sql, Dialect::Sqlite);
}

#[test]
fn test_explicit_association_join() {
    let plan = hr_select(
        "select e.name, d.name from Employee e left join e.department d order by d.name",
        Dialect::Sqlite,
    );
    insta::assert_snapshot!(plan.statement.sql, @r#"SELECT "e1_0"."name", "d2_0"."name" FROM "tabEmployees" AS "e1_0" LEFT JOIN "department" AS "d2_0" ON "d2_0"."id" = "e1_0"."department_id" ORDER BY "d2_0"."name""#);
    validate(&plan.statement.sql, Dialect::Sqlite);
}

#[test]
fn test_collection_join_from_inverse_side() {
    let plan = hr_select(
        "select d.name, count(e.id) from Department d join d.employees e group by d.name",
        Dialect::Postgres,
    );
    let sql = &plan.statement.sql;
    assert!(sql.contains(r#"INNER JOIN "tabEmployees" AS "e2_0" ON "e2_0"."department_id" = "d1_0"."id""#));
    assert!(sql.contains("GROUP BY"));
    validate(sql, Dialect::Postgres);
}

#[test]
fn test_fetch_join_hydrates_association() {
    let plan = hr_select(
        "select e from Employee e join fetch e.department d",
        Dialect::Sqlite,
    );
    assert_eq!(plan.fetches.len(), 1);
    assert_eq!(plan.fetches[0].parent, 0);
    assert!(plan.statement.sql.contains(r#""d2_0"."name""#));
}

// ============================================================================
// Dialects
// ============================================================================

#[test]
fn test_placeholders_per_dialect() {
    let text = "select e.name from Employee e where e.name = :name and e.salary > ?1";
    let sqlite = hr_select(text, Dialect::Sqlite);
    assert!(sqlite.statement.sql.ends_with(r#""e1_0"."salary" > ?"#));
    let postgres = hr_select(text, Dialect::Postgres);
    assert!(postgres.statement.sql.ends_with(r#""e1_0"."salary" > $2"#));
    assert_eq!(
        postgres.statement.bindings,
        vec![Parameter::Named("name".into()), Parameter::Positional(1)]
    );
}

#[test]
fn test_every_dialect_parses() {
    let text = "select e.name, e.salary from Employee e where e.bio like 'a%' \
                and e.salary between 10 and 20 order by e.salary desc";
    for dialect in [
        Dialect::Sqlite,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::DuckDb,
    ] {
        validate(&hr_select(text, dialect).statement.sql, dialect);
    }
}

#[test]
fn test_mysql_quotes_with_backticks() {
    let plan = hr_select("select e.name from Employee e", Dialect::MySql);
    insta::assert_snapshot!(plan.statement.sql, @"SELECT `e1_0`.`name` FROM `tabEmployees` AS `e1_0`");
}

#[test]
fn test_pass_through_table() {
    let plan = hr_select("select a from audit_log a", Dialect::Sqlite);
    assert!(matches!(plan.items[0], ResultItem::Wildcard { start: 0 }));
    assert!(plan.statement.sql.contains(r#"FROM "audit_log""#));
}

#[test]
fn test_literal_with_escaped_quote() {
    let plan = hr_select(
        "select e.name from Employee e where e.name = '''He is '' the, Employee Number 1'''",
        Dialect::Sqlite,
    );
    assert!(plan
        .statement
        .sql
        .ends_with("= '''He is '' the, Employee Number 1'''"));
}
