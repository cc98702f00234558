//! The contract between the engine and a database driver.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::sql::Dialect;

use super::row::{Row, Rows};
use super::value::Value;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No transaction is active")]
    NoTransaction,

    #[error("A transaction is already active")]
    TransactionActive,
}

/// A single database connection, used by one session at a time.
///
/// Implementations execute the SQL handed to them without rewriting it and
/// propagate driver failures unchanged.
pub trait Connection: Send {
    /// SQL flavour this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Run a statement that returns rows, handing each row to `visit` as
    /// the driver steps its cursor. `ControlFlow::Break` stops reading.
    /// Returns the number of rows visited.
    fn stream(
        &mut self,
        sql: &str,
        params: &[Value],
        visit: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> Result<usize, ConnectionError>;

    /// Run a statement and collect every row it returns. An empty result
    /// carries no column names.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows, ConnectionError> {
        let mut columns: Option<Arc<[String]>> = None;
        let mut values = Vec::new();
        self.stream(sql, params, &mut |row: Row| {
            columns.get_or_insert_with(|| row.columns().iter().cloned().collect());
            values.push(row.into_values());
            ControlFlow::Continue(())
        })?;
        Ok(Rows::new(columns.unwrap_or_else(|| Arc::from(Vec::new())), values))
    }

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError>;

    /// Run several parameterless statements separated by semicolons.
    fn execute_batch(&mut self, sql: &str) -> Result<(), ConnectionError>;

    fn begin(&mut self) -> Result<(), ConnectionError>;

    fn commit(&mut self) -> Result<(), ConnectionError>;

    fn rollback(&mut self) -> Result<(), ConnectionError>;

    fn in_transaction(&self) -> bool;
}
