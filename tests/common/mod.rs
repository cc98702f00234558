//! Shared fixtures: an HR mapping over in-memory SQLite, and a connection
//! that records every statement it runs.

#![allow(dead_code)]

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use relata::engine::{Connection, ConnectionError, Row, SqliteConnection, Value};
use relata::metamodel::{Association, Attribute, EntityBuilder, IdGenerator, Metamodel, ValueType};
use relata::sql::Dialect;
use relata::{Session, SessionFactory};

/// Department 1-n Employee, an optional `employee_details` secondary table,
/// a joined `Manager` subclass and a versioned `Account`.
pub fn hr_metamodel() -> Metamodel {
    Metamodel::builder()
        .entity(
            EntityBuilder::new("Department")
                .qualified_name("org.acme.Department")
                .id("id", ValueType::Integer)
                .generator(IdGenerator::Increment)
                .attribute(Attribute::new("name", ValueType::Text).not_null())
                .association(
                    Association::one_to_many("employees", "Employee", "department")
                        .cascade_persist()
                        .cascade_remove(),
                ),
        )
        .entity(
            EntityBuilder::new("Employee")
                .qualified_name("org.acme.Employee")
                .table("tabEmployees")
                .secondary_table("employee_details", true)
                .id("id", ValueType::Integer)
                .generator(IdGenerator::Increment)
                .attribute(Attribute::new("name", ValueType::Text))
                .attribute(Attribute::new("salary", ValueType::Integer))
                .attribute(Attribute::new("bio", ValueType::Text).table("employee_details"))
                .attribute(Attribute::new("notes", ValueType::Text).lazy())
                .association(Association::to_one("department", "Department").lazy()),
        )
        .entity(
            EntityBuilder::new("Manager")
                .qualified_name("org.acme.Manager")
                .joined_subclass_of("Employee")
                .attribute(Attribute::new("level", ValueType::Integer)),
        )
        .entity(
            EntityBuilder::new("Account")
                .qualified_name("org.acme.Account")
                .id("number", ValueType::Text)
                .attribute(Attribute::new("owner", ValueType::Text))
                .attribute(Attribute::new("balance", ValueType::Integer))
                .attribute(Attribute::new("version", ValueType::Integer))
                .version("version"),
        )
        .build()
        .expect("hr mapping is valid")
}

pub fn hr_factory() -> SessionFactory {
    SessionFactory::builder(hr_metamodel()).build()
}

/// In-memory database with every mapped table created.
pub fn database(factory: &SessionFactory) -> SqliteConnection {
    let mut connection = SqliteConnection::open_in_memory().expect("open in-memory database");
    factory
        .export_schema(&mut connection)
        .expect("create schema");
    connection
}

pub fn open(factory: &SessionFactory) -> Session {
    factory.open_session(database(factory))
}

/// Two departments, three employees; employee 1 has a details row.
pub fn seed(session: &mut Session) {
    session
        .connection()
        .execute_batch(
            "INSERT INTO department (id, name) VALUES (1, 'Research'), (2, 'Sales');
             INSERT INTO tabEmployees (id, name, salary, notes, department_id) VALUES
                 (1, 'Ada', 100, 'likes engines', 1),
                 (2, 'Grace', 120, NULL, 1),
                 (3, 'Linus', 90, NULL, 2);
             INSERT INTO employee_details (id, bio) VALUES (1, 'analyst');",
        )
        .expect("seed rows");
}

/// Single value of a native statement, for checking what reached the
/// database.
pub fn scalar(session: &mut Session, sql: &str) -> Value {
    session
        .connection()
        .query(sql, &[])
        .expect("query")
        .next()
        .and_then(|row| row.into_values().into_iter().next())
        .unwrap_or_default()
}

/// Delegates to SQLite and keeps the text of every statement.
pub struct RecordingConnection {
    inner: SqliteConnection,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingConnection {
    pub fn new(inner: SqliteConnection) -> (Self, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner,
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn stream(
        &mut self,
        sql: &str,
        params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<usize, ConnectionError> {
        self.log.lock().push(sql.to_string());
        self.inner.stream(sql, params, visit)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        self.log.lock().push(sql.to_string());
        self.inner.execute(sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.inner.execute_batch(sql)
    }

    fn begin(&mut self) -> Result<(), ConnectionError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

/// A session over a recording connection, seeded, with the log cleared.
pub fn recorded(factory: &SessionFactory) -> (Session, Arc<Mutex<Vec<String>>>) {
    let (connection, log) = RecordingConnection::new(database(factory));
    let mut session = factory.open_session(connection);
    seed(&mut session);
    log.lock().clear();
    (session, log)
}

/// Recorded statements that write.
pub fn writes(log: &Mutex<Vec<String>>) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|sql| !sql.starts_with("SELECT"))
        .cloned()
        .collect()
}
