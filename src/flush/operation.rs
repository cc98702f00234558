//! Single-row write operations produced by the flush planner.

use std::fmt;

use crate::engine::{KeyValue, Value};
use crate::session::Entity;
use crate::sql::{self, Delete, Dialect, Expr, ExprExt, Insert, Update};

/// Optimistic-lock condition on the version column.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionCheck {
    pub column: String,
    /// Version read with the snapshot.
    pub expected: i64,
}

/// What to do when an UPDATE or DELETE matches no row.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingRow {
    /// The row changed underneath the session.
    Stale,
    /// Optional secondary row of unknown presence: create it.
    Insert(Vec<(String, Value)>),
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    Insert {
        columns: Vec<(String, Value)>,
    },
    Update {
        columns: Vec<(String, Value)>,
        version: Option<VersionCheck>,
        missing: MissingRow,
    },
    Delete {
        version: Option<VersionCheck>,
        missing: MissingRow,
    },
}

/// One statement against one table row of one instance.
#[derive(Debug, Clone)]
pub struct WriteOperation {
    pub entity: Entity,
    pub key: KeyValue,
    /// Index into the entity's tables.
    pub table_index: usize,
    pub table: String,
    pub key_column: String,
    pub kind: WriteKind,
}

impl WriteOperation {
    /// SQL text and parameter values.
    pub fn statement(&self, dialect: Dialect) -> (String, Vec<Value>) {
        match &self.kind {
            WriteKind::Insert { columns } => insert(&self.table, &self.key_column, &self.key, columns, dialect),
            WriteKind::Update {
                columns, version, ..
            } => {
                let mut params: Vec<Value> = Vec::with_capacity(columns.len() + 2);
                let mut update = Update::table(&self.table);
                for (column, value) in columns {
                    params.push(value.clone());
                    update = update.set(column, sql::param(params.len()));
                }
                let filter = self.key_filter(&mut params, version.as_ref());
                (update.filter(filter).to_sql(dialect), params)
            }
            WriteKind::Delete { version, .. } => {
                let mut params = Vec::with_capacity(2);
                let filter = self.key_filter(&mut params, version.as_ref());
                (
                    Delete::from(&self.table).filter(filter).to_sql(dialect),
                    params,
                )
            }
        }
    }

    /// INSERT to run when an UPDATE of an optional row matched nothing.
    pub fn fallback_insert(&self, dialect: Dialect) -> Option<(String, Vec<Value>)> {
        match &self.kind {
            WriteKind::Update {
                missing: MissingRow::Insert(columns),
                ..
            } => Some(insert(
                &self.table,
                &self.key_column,
                &self.key,
                columns,
                dialect,
            )),
            _ => None,
        }
    }

    /// Whether zero affected rows means the row went stale.
    pub fn expects_row(&self) -> bool {
        matches!(
            self.kind,
            WriteKind::Update {
                missing: MissingRow::Stale,
                ..
            } | WriteKind::Delete {
                missing: MissingRow::Stale,
                ..
            }
        )
    }

    pub fn version(&self) -> Option<&VersionCheck> {
        match &self.kind {
            WriteKind::Update { version, .. } | WriteKind::Delete { version, .. } => {
                version.as_ref()
            }
            WriteKind::Insert { .. } => None,
        }
    }

    fn key_filter(&self, params: &mut Vec<Value>, version: Option<&VersionCheck>) -> Expr {
        params.push(Value::from(self.key.clone()));
        let mut filter =
            sql::table_col(&self.table, &self.key_column).eq(sql::param(params.len()));
        if let Some(check) = version {
            params.push(Value::Integer(check.expected));
            filter = filter.and(sql::table_col(&self.table, &check.column).eq(sql::param(params.len())));
        }
        filter
    }
}

fn insert(
    table: &str,
    key_column: &str,
    key: &KeyValue,
    columns: &[(String, Value)],
    dialect: Dialect,
) -> (String, Vec<Value>) {
    let mut params = Vec::with_capacity(columns.len() + 1);
    params.push(Value::from(key.clone()));
    params.extend(columns.iter().map(|(_, value)| value.clone()));
    let names = std::iter::once(key_column.to_string())
        .chain(columns.iter().map(|(column, _)| column.clone()));
    let sql = Insert::into(table)
        .columns(names)
        .values((1..=params.len()).map(sql::param))
        .to_sql(dialect);
    (sql, params)
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = |columns: &[(String, Value)]| {
            columns
                .iter()
                .map(|(column, _)| column.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &self.kind {
            WriteKind::Insert { columns: c } => {
                write!(f, "insert {}#{} ({})", self.table, self.key, columns(c))
            }
            WriteKind::Update { columns: c, .. } => {
                write!(f, "update {}#{} ({})", self.table, self.key, columns(c))
            }
            WriteKind::Delete { .. } => write!(f, "delete {}#{}", self.table, self.key),
        }
    }
}
