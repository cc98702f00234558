//! Integration tests for query parsing and literal preservation through the
//! whole text pipeline.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use proptest::prelude::*;
use relata::oql::{self, Expr, JoinKind, Literal, Parameter, Statement, SyntaxErrorKind};
use relata::resolve::{ImportCache, Resolver};
use relata::sql::Dialect;
use relata::translate::{Translation, Translator};

fn where_literal(text: &str) -> Literal {
    let ast = oql::parse(text).unwrap();
    let Statement::Select(select) = ast.statement else {
        panic!("expected select");
    };
    let Some(Expr::Binary { right, .. }) = select.where_clause else {
        panic!("expected comparison");
    };
    match *right {
        Expr::Literal(literal) => literal,
        other => panic!("expected literal, got {other:?}"),
    }
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_select_with_every_clause() {
    let ast = oql::parse(
        "select distinct d.name, count(e) as heads from Department d join d.employees e \
         where e.salary > 10 group by d.name having count(e) > 1 order by d.name desc limit 5",
    )
    .unwrap();
    let Statement::Select(select) = ast.statement else {
        panic!("expected select");
    };
    assert!(select.distinct);
    assert_eq!(select.selections.len(), 2);
    assert_eq!(select.selections[1].alias.as_deref(), Some("heads"));
    assert_eq!(select.joins[0].kind, JoinKind::Inner);
    assert_eq!(select.joins[0].target.segments, vec!["d", "employees"]);
    assert_eq!(select.group_by.len(), 1);
    assert!(select.having.is_some());
    assert!(select.order_by[0].descending);
    assert_eq!(select.limit, Some(5));
}

#[test]
fn test_keywords_are_case_insensitive() {
    let lower = oql::parse("select e.name from Employee e where e.id = 1").unwrap();
    let upper = oql::parse("SELECT e.name FROM Employee e WHERE e.id = 1").unwrap();
    assert_eq!(lower.statement, upper.statement);
}

#[test]
fn test_source_text_is_kept() {
    let text = "from Employee e where e.name = 'x'";
    assert_eq!(oql::parse(text).unwrap().source, text);
}

#[test]
fn test_bulk_statements() {
    let ast = oql::parse("update Employee set salary = salary + 1 where name like 'A%'").unwrap();
    let Statement::Update(update) = ast.statement else {
        panic!("expected update");
    };
    assert!(update.target.alias.is_none());
    assert_eq!(update.assignments[0].path.segments, vec!["salary"]);

    let ast = oql::parse("delete Employee e where e.id in (1, 2, 3)").unwrap();
    assert!(matches!(ast.statement, Statement::Delete(_)));
}

#[test]
fn test_parameter_styles() {
    let ast = oql::parse("from Employee e where e.name = :name or e.id = ?1").unwrap();
    let text = format!("{:?}", ast.statement);
    assert!(text.contains(&format!("{:?}", Parameter::Named("name".into()))));
    assert!(text.contains(&format!("{:?}", Parameter::Positional(1))));
}

// ============================================================================
// String Literals
// ============================================================================

#[test]
fn test_doubled_quote_is_an_escape() {
    assert_eq!(
        where_literal("from Employee e where e.name = 'it''s'"),
        Literal::String("it's".into())
    );
}

#[test]
fn test_literal_with_commas_and_keywords() {
    assert_eq!(
        where_literal("from Employee e where e.name = 'select, from Employee where, and or'"),
        Literal::String("select, from Employee where, and or".into())
    );
}

#[test]
fn test_literal_made_of_quotes() {
    assert_eq!(
        where_literal("from Employee e where e.name = ''''''"),
        Literal::String("''".into())
    );
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_unterminated_string() {
    let err = oql::parse("from Employee e where e.name = 'abc").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnterminatedString);
}

#[test]
fn test_doubled_quote_at_end_is_unterminated() {
    let err = oql::parse("from Employee e where e.name = 'abc''").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnterminatedString);
}

#[test]
fn test_unbalanced_quoted_entity_name() {
    let err = oql::parse("from `Employee e").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnterminatedIdentifier);
}

#[test]
fn test_unknown_character() {
    let err = oql::parse("from Employee e where e.id = #1").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnexpectedCharacter);
}

#[test]
fn test_error_display_has_span() {
    let err = oql::parse("from Employee e where").unwrap_err();
    assert!(err.to_string().ends_with("at 21..21"));
}

// ============================================================================
// Round Trip
// ============================================================================

fn escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn resolver() -> Resolver {
    Resolver::new(
        Arc::new(common::hr_metamodel()),
        Arc::new(ImportCache::new(16)),
    )
}

proptest! {
    #[test]
    fn prop_literal_survives_parse_split_and_translate(
        value in "[a-zA-Z ,'()=]{0,24}|(select|from|where|and|Employee|, |'')+"
    ) {
        let literal = escape(&value);
        let text = format!("select e.name from Employee e where e.name = {literal}");

        prop_assert_eq!(where_literal(&text), Literal::String(value.clone()));

        let resolved = resolver().resolve_text(&text).unwrap();
        prop_assert_eq!(resolved.len(), 1);
        prop_assert_eq!(
            &resolved[0].text,
            &format!("select e.name from org.acme.Employee e where e.name = {literal}")
        );

        let Translation::Select(plan) = Translator::new(Dialect::Sqlite).translate(&resolved[0]).unwrap() else {
            panic!("expected select");
        };
        prop_assert!(plan.statement.sql.ends_with(&literal));
    }
}
