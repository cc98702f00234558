//! Integration tests for root-name imports and query splitting.

use std::sync::Arc;

use relata::metamodel::{Association, Attribute, EntityBuilder, Metamodel, ValueType};
use relata::resolve::{ImportCache, ImportLookup, ResolveError, Resolver, SourceTarget};

fn metamodel() -> Arc<Metamodel> {
    Arc::new(
        Metamodel::builder()
            .entity(
                EntityBuilder::new("Department")
                    .qualified_name("org.acme.hr.Department")
                    .id("id", ValueType::Integer)
                    .attribute(Attribute::new("name", ValueType::Text))
                    .association(Association::one_to_many("employees", "Employee", "department")),
            )
            .entity(
                EntityBuilder::new("Employee")
                    .qualified_name("org.acme.hr.Employee")
                    .id("id", ValueType::Integer)
                    .attribute(Attribute::new("name", ValueType::Text))
                    .association(Association::to_one("department", "Department"))
                    .implements("Payable"),
            )
            .entity(
                EntityBuilder::new("Invoice")
                    .qualified_name("org.acme.billing.Invoice")
                    .id("id", ValueType::Integer)
                    .attribute(Attribute::new("name", ValueType::Text))
                    .implements("Payable"),
            )
            .entity(
                EntityBuilder::new("Invoice")
                    .qualified_name("org.acme.legacy.Invoice")
                    .table("legacy_invoice")
                    .id("id", ValueType::Integer)
                    .attribute(Attribute::new("name", ValueType::Text)),
            )
            .build()
            .unwrap(),
    )
}

fn resolver(capacity: usize) -> Resolver {
    Resolver::new(metamodel(), Arc::new(ImportCache::new(capacity)))
}

fn texts(resolver: &Resolver, query: &str) -> Vec<String> {
    resolver
        .resolve_text(query)
        .unwrap()
        .into_iter()
        .map(|q| q.text)
        .collect()
}

// ============================================================================
// Splitting
// ============================================================================

#[test]
fn test_single_entity_is_qualified() {
    assert_eq!(
        texts(&resolver(8), "select e.name from Employee e"),
        vec!["select e.name from org.acme.hr.Employee e"]
    );
}

#[test]
fn test_qualified_name_is_kept() {
    assert_eq!(
        texts(&resolver(8), "from org.acme.legacy.Invoice i"),
        vec!["from org.acme.legacy.Invoice i"]
    );
}

#[test]
fn test_supertype_fans_out_in_registration_order() {
    assert_eq!(
        texts(&resolver(8), "from Payable p where p.name = :name"),
        vec![
            "from org.acme.hr.Employee p where p.name = :name",
            "from org.acme.billing.Invoice p where p.name = :name",
        ]
    );
}

#[test]
fn test_shared_short_name_fans_out() {
    assert_eq!(
        texts(&resolver(8), "delete from Invoice where name = 'void'"),
        vec![
            "delete from org.acme.billing.Invoice where name = 'void'",
            "delete from org.acme.legacy.Invoice where name = 'void'",
        ]
    );
}

#[test]
fn test_every_root_combination() {
    let queries = texts(&resolver(8), "select p, d from Payable p, Department d");
    assert_eq!(
        queries,
        vec![
            "select p, d from org.acme.hr.Employee p, org.acme.hr.Department d",
            "select p, d from org.acme.billing.Invoice p, org.acme.hr.Department d",
        ]
    );
}

#[test]
fn test_literals_are_not_roots() {
    assert_eq!(
        texts(
            &resolver(8),
            "from Employee e where e.name = 'from Payable p, Invoice i' or e.name = 'it''s'"
        ),
        vec!["from org.acme.hr.Employee e where e.name = 'from Payable p, Invoice i' or e.name = 'it''s'"]
    );
}

#[test]
fn test_spacing_and_case_of_the_rest_is_kept() {
    assert_eq!(
        texts(&resolver(8), "SELECT  e.name\nFROM Employee   e  WHERE e.id = ?"),
        vec!["SELECT  e.name\nFROM org.acme.hr.Employee   e  WHERE e.id = ?"]
    );
}

#[test]
fn test_comma_inside_literal_is_not_a_root_separator() {
    assert_eq!(
        texts(
            &resolver(8),
            "select e from Employee a where e.name = ', Employee Number 1'"
        ),
        vec!["select e from org.acme.hr.Employee a where e.name = ', Employee Number 1'"]
    );
}

#[test]
fn test_escaped_quotes_inside_literal_of_unaliased_root() {
    assert_eq!(
        texts(
            &resolver(8),
            "from Employee where name = '''He is '' the, Employee Number 1'''"
        ),
        vec!["from org.acme.hr.Employee where name = '''He is '' the, Employee Number 1'''"]
    );
}

#[test]
fn test_alias_rooted_join_skips_import_cache() {
    let resolver = resolver(8);
    let err = resolver
        .resolve_text("from Employee e join e.company c")
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::NotAnAssociation { ref attribute, .. } if attribute == "company"
    ));
    assert_eq!(resolver.imports().invalid_len(), 0);
    assert_eq!(resolver.imports().lookup("e.company"), ImportLookup::Unknown);
}

// ============================================================================
// Import Cache
// ============================================================================

#[test]
fn test_valid_imports_are_remembered() {
    let resolver = resolver(8);
    resolver.resolve_text("from Payable p").unwrap();
    assert_eq!(
        resolver.imports().lookup("Payable"),
        ImportLookup::Valid(Arc::from(vec![
            "org.acme.hr.Employee".to_string(),
            "org.acme.billing.Invoice".to_string(),
        ]))
    );
    assert_eq!(resolver.imports().valid_len(), 1);
}

#[test]
fn test_unknown_names_pass_through() {
    let resolver = resolver(8);
    let queries = resolver.resolve_text("select a from audit_log a").unwrap();
    assert_eq!(queries[0].text, "select a from audit_log a");
    assert_eq!(
        queries[0].sources[0].target,
        SourceTarget::Table("audit_log".into())
    );
    assert_eq!(resolver.imports().invalid_len(), 1);
}

#[test]
fn test_invalid_imports_are_bounded() {
    let resolver = resolver(2);
    for table in ["t1", "t2", "t3"] {
        resolver.resolve_text(&format!("from {table} x")).unwrap();
    }
    assert_eq!(resolver.imports().invalid_len(), 2);
    assert_eq!(resolver.imports().lookup("t1"), ImportLookup::Unknown);
    assert_eq!(resolver.imports().lookup("t3"), ImportLookup::Invalid);
}

#[test]
fn test_zero_capacity_remembers_nothing_invalid() {
    let resolver = resolver(0);
    resolver.resolve_text("from t1 x").unwrap();
    assert_eq!(resolver.imports().invalid_len(), 0);
    assert_eq!(
        texts(&resolver, "from t1 x"),
        vec!["from t1 x"]
    );
}

#[test]
fn test_clear_forgets_both_sides() {
    let resolver = resolver(8);
    resolver.resolve_text("from Employee e, audit_log a").unwrap();
    resolver.imports().clear();
    assert_eq!(resolver.imports().valid_len(), 0);
    assert_eq!(resolver.imports().invalid_len(), 0);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_syntax_errors_surface() {
    let err = resolver(8).resolve_text("from Employee e where").unwrap_err();
    assert!(matches!(err, ResolveError::Syntax(_)));
}

#[test]
fn test_unknown_property() {
    let err = resolver(8)
        .resolve_text("from Employee e where e.salary > 1")
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::UnknownAttribute { ref attribute, .. } if attribute == "salary"
    ));
}

#[test]
fn test_collection_path_needs_join() {
    let err = resolver(8)
        .resolve_text("from Department d where d.employees.name = 'x'")
        .unwrap_err();
    assert!(matches!(err, ResolveError::CollectionPath { .. }));

    let queries = resolver(8)
        .resolve_text("select d from Department d join d.employees e where e.name = 'x'")
        .unwrap();
    assert_eq!(queries[0].sources.len(), 2);
}
