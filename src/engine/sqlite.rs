//! SQLite connection adapter.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::params_from_iter;

use crate::sql::Dialect;

use super::connection::{Connection, ConnectionError};
use super::row::Row;
use super::value::Value;

/// A [`Connection`] over a bundled SQLite database.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    in_transaction: bool,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl SqliteConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init(conn)
    }

    /// Open from a configured connection string: a file path or `:memory:`.
    pub fn open_url(url: &str) -> Result<Self, ConnectionError> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        if path.is_empty() || path == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(path)
        }
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, ConnectionError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Integer(n) => SqliteValue::Integer(*n),
        Value::Real(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Boolean(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn stream(
        &mut self,
        sql: &str,
        params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<usize, ConnectionError> {
        tracing::trace!(sql, params = params.len(), "sqlite query");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite)))?;
        let mut visited = 0;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_sqlite(row.get_ref(index)?));
            }
            visited += 1;
            if visit(Row::new(Arc::clone(&columns), values)).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        tracing::trace!(sql, params = params.len(), "sqlite execute");
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))?;
        Ok(affected as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), ConnectionError> {
        if self.in_transaction {
            return Err(ConnectionError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        if !self.in_transaction {
            return Err(ConnectionError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        if !self.in_transaction {
            return Err(ConnectionError::NoTransaction);
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
