//! SQL translation of resolved queries.
//!
//! Every column is qualified with a generated table alias (`e1_0` is table
//! 0 of source 1, an `Employee`). Tables beyond an entity's first are joined
//! on its key, and secondary tables only when a referenced attribute lives
//! there. Parameters become dialect placeholders numbered in text order;
//! [`SqlStatement::bindings`] records which query parameter fills each.

mod context;
mod mapping;
mod mutation;
mod select;

use crate::oql::Parameter;
use crate::resolve::{ResolvedQuery, ResolvedStatement};
use crate::sql::Dialect;

pub use mapping::{EntityRowMapping, FetchedAssociation, ResultItem};
pub use mutation::{MutationPlan, TableMutation, TableMutationKind};

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{0} is not an entity")]
    NotAnEntity(String),

    #[error("Column {column} is not in table {table}")]
    CrossTableReference { table: String, column: String },

    #[error("Unsupported in SQL translation: {0}")]
    Unsupported(String),
}

/// SQL text plus the parameter bound at each placeholder, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub bindings: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub statement: SqlStatement,
    pub items: Vec<ResultItem>,
    pub fetches: Vec<FetchedAssociation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Select(SelectPlan),
    Mutation(MutationPlan),
}

impl Translation {
    /// SQL text for display, one statement per line. Per-table statements
    /// of a restricted mutation are shown for a single identifier.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Translation::Select(plan) => plan.statement.sql.clone(),
            Translation::Mutation(MutationPlan::Direct(statement)) => statement.sql.clone(),
            Translation::Mutation(MutationPlan::Restricted {
                id_query,
                statements,
            }) => {
                let mut sql = id_query.sql.clone();
                for statement in statements {
                    sql.push('\n');
                    sql.push_str(&statement.render(dialect, 1));
                }
                sql
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Translator {
    dialect: Dialect,
}

impl Translator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn translate(&self, query: &ResolvedQuery) -> Result<Translation, TranslateError> {
        let translation = match &query.statement {
            ResolvedStatement::Select(select) => {
                Translation::Select(select::plan_select(query, select, self.dialect)?)
            }
            ResolvedStatement::Update(update) => {
                Translation::Mutation(mutation::plan_update(query, update, self.dialect)?)
            }
            ResolvedStatement::Delete(delete) => {
                Translation::Mutation(mutation::plan_delete(query, delete, self.dialect)?)
            }
        };
        tracing::debug!(query = %query.text, sql = %translation.to_sql(self.dialect), "translated");
        Ok(translation)
    }
}
