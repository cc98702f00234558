//! Integration tests for native SQL queries and named result-set mappings.

#[path = "../common/mod.rs"]
mod common;

use relata::engine::{HydrationError, Value};
use relata::metamodel::{MetamodelError, ResultSetMapping, ResultSetMappingRegistry, ValueType};
use relata::session::{AccessError, ResultValue, SessionError};
use relata::SessionFactory;

use common::{database, hr_metamodel, seed};

fn factory() -> SessionFactory {
    let registry = ResultSetMappingRegistry::new();
    registry.register(ResultSetMapping::new("employee_row").entity("Employee", [("name", "emp_name")]));
    registry.register(
        ResultSetMapping::new("headcount")
            .entity("Department", [("name", "name")])
            .scalar("staff", Some(ValueType::Integer)),
    );
    SessionFactory::builder(hr_metamodel())
        .result_mappings(registry)
        .build()
}

fn session(factory: &SessionFactory) -> relata::Session {
    let mut session = factory.open_session(database(factory));
    seed(&mut session);
    session
}

#[test]
fn test_mapped_entities_join_the_identity_map() {
    let factory = factory();
    let mut session = session(&factory);

    let rows = session
        .native_query("SELECT id, name AS emp_name, salary FROM tabEmployees WHERE id = ?")
        .bind(1)
        .with_mapping("employee_row")
        .list()
        .unwrap();
    assert_eq!(rows.len(), 1);
    let ada = rows[0].as_entity().unwrap();
    assert_eq!(ada.get("name").unwrap(), Value::from("Ada"));
    assert_eq!(ada.get("salary").unwrap(), Value::Integer(100));

    let found = session.find("Employee", 1).unwrap().unwrap();
    assert!(found.ptr_eq(ada));
}

#[test]
fn test_absent_columns_stay_unloaded() {
    let factory = factory();
    let mut session = session(&factory);

    let rows = session
        .native_query("SELECT id, name AS emp_name FROM tabEmployees WHERE id = 1")
        .with_mapping("employee_row")
        .list()
        .unwrap();
    let ada = rows[0].as_entity().unwrap().clone();
    assert!(!ada.is_loaded("bio").unwrap());
    assert!(matches!(
        ada.get("salary"),
        Err(AccessError::NotLoaded { attribute, .. }) if attribute == "salary"
    ));

    assert_eq!(
        session.load_attribute(&ada, "bio").unwrap(),
        Value::from("analyst")
    );
    // loading is not a change
    session.flush().unwrap();

    // an update of the secondary row after a native load goes to the right row
    ada.set("bio", "engineer").unwrap();
    session.flush().unwrap();
    assert_eq!(
        common::scalar(&mut session, "SELECT bio FROM employee_details WHERE id = 1"),
        Value::from("engineer")
    );
}

#[test]
fn test_managed_instance_is_reused() {
    let factory = factory();
    let mut session = session(&factory);

    let grace = session.find("Employee", 2).unwrap().unwrap();
    grace.set("salary", 200).unwrap();
    let rows = session
        .native_query("SELECT id, name AS emp_name, salary FROM tabEmployees WHERE id = 2")
        .with_mapping("employee_row")
        .list()
        .unwrap();
    let listed = rows[0].as_entity().unwrap();
    assert!(listed.ptr_eq(&grace));
    assert_eq!(listed.get("salary").unwrap(), Value::Integer(200));
}

#[test]
fn test_entity_with_scalar() {
    let factory = factory();
    let mut session = session(&factory);

    let rows = session
        .native_query(
            "SELECT d.id, d.name, count(e.id) AS staff
             FROM department d LEFT JOIN tabEmployees e ON e.department_id = d.id
             GROUP BY d.id, d.name ORDER BY d.id",
        )
        .with_mapping("headcount")
        .list()
        .unwrap();

    let summary: Vec<(Value, Value)> = rows
        .iter()
        .map(|row| match row {
            ResultValue::Tuple(items) => (
                items[0].as_entity().unwrap().get("name").unwrap(),
                items[1].as_value().unwrap().clone(),
            ),
            other => panic!("expected a tuple, got {:?}", other),
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (Value::from("Research"), Value::Integer(2)),
            (Value::from("Sales"), Value::Integer(1)),
        ]
    );
}

#[test]
fn test_unmapped_rows_are_values() {
    let factory = factory();
    let mut session = session(&factory);

    let names = session
        .native_query("SELECT name FROM tabEmployees WHERE salary > ? ORDER BY salary")
        .bind(95)
        .list()
        .unwrap();
    assert_eq!(
        names,
        vec![
            ResultValue::Value(Value::from("Ada")),
            ResultValue::Value(Value::from("Grace")),
        ]
    );

    let pairs = session
        .native_query("SELECT name, salary FROM tabEmployees WHERE id = ?2 OR salary = ?1 ORDER BY id")
        .bind_at(2, 3)
        .bind_at(1, 120)
        .list()
        .unwrap();
    assert_eq!(
        pairs,
        vec![
            ResultValue::Tuple(vec![
                ResultValue::Value(Value::from("Grace")),
                ResultValue::Value(Value::Integer(120)),
            ]),
            ResultValue::Tuple(vec![
                ResultValue::Value(Value::from("Linus")),
                ResultValue::Value(Value::Integer(90)),
            ]),
        ]
    );
    assert!(session.identity_map().is_empty());
}

#[test]
fn test_native_statement() {
    let factory = factory();
    let mut session = session(&factory);

    let affected = session
        .native_query("UPDATE tabEmployees SET salary = salary + ? WHERE department_id = ?")
        .bind(5)
        .bind(1)
        .execute()
        .unwrap();
    assert_eq!(affected, 2);
}

#[test]
fn test_mapping_errors() {
    let factory = factory();
    let mut session = session(&factory);

    assert!(matches!(
        session.native_query("SELECT 1").with_mapping("payroll").list(),
        Err(SessionError::Metamodel(MetamodelError::UnknownResultMapping(name))) if name == "payroll"
    ));
    assert!(matches!(
        session
            .native_query("SELECT name AS emp_name FROM tabEmployees")
            .with_mapping("employee_row")
            .list(),
        Err(SessionError::Hydration(HydrationError::MissingColumn(column))) if column == "id"
    ));
}
